//! Document, index-queue and key/value tables stored next to the chunk vectors.
use anyhow::{anyhow, Result};
use arrow_array::{Int32Array, Int64Array, RecordBatch, StringArray, TimestampMillisecondArray};
use chrono::Utc;
use lancedb::{Connection, Table};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use localsearch_core::types::{ChangeKind, Document, IndexQueueItem, QueueItemStatus, QueueStatus};

use crate::schema::{build_document_schema, build_meta_schema, build_queue_schema, DOCUMENTS_TABLE, META_TABLE, QUEUE_TABLE};
use crate::table::{ensure_table, int32s, int64s, opt_string, opt_time, parse_tags, scan, sql_quote, strings, tags_json, time, timestamps, upsert};

pub struct Catalog {
	documents: Table,
	queue: Table,
	meta: Table,
	next_seq: AtomicU64,
}

impl Catalog {
	pub async fn open(db: &Connection) -> Result<Self> {
		let documents = ensure_table(db, DOCUMENTS_TABLE, build_document_schema()).await?;
		let queue = ensure_table(db, QUEUE_TABLE, build_queue_schema()).await?;
		let meta = ensure_table(db, META_TABLE, build_meta_schema()).await?;
		let catalog = Self { documents, queue, meta, next_seq: AtomicU64::new(0) };
		let last = catalog.load_queue(None).await?.iter().map(|(seq, _)| *seq).max().unwrap_or(0);
		catalog.next_seq.store(last.max(0) as u64, Ordering::SeqCst);
		Ok(catalog)
	}

	// ----- documents -----

	pub async fn upsert_document(&self, document: &Document, chunk_count: usize) -> Result<()> {
		let batch = RecordBatch::try_new(build_document_schema(), vec![
			Arc::new(StringArray::from(vec![document.document_id.clone()])),
			Arc::new(StringArray::from(vec![document.file_path.clone()])),
			Arc::new(StringArray::from(vec![document.file_name.clone()])),
			Arc::new(StringArray::from(vec![document.content_hash.clone()])),
			Arc::new(TimestampMillisecondArray::from(vec![document.modified_at.timestamp_millis()])),
			Arc::new(StringArray::from(vec![tags_json(&document.tags)])),
			Arc::new(Int32Array::from(vec![chunk_count as i32])),
		])?;
		upsert(&self.documents, &["document_id"], batch).await
	}

	pub async fn get_document(&self, document_id: &str) -> Result<Option<Document>> {
		Ok(self.find_documents(Some(&format!("document_id = {}", sql_quote(document_id)))).await?.into_iter().next())
	}

	pub async fn get_document_by_path(&self, file_path: &str) -> Result<Option<Document>> {
		Ok(self.find_documents(Some(&format!("file_path = {}", sql_quote(file_path)))).await?.into_iter().next())
	}

	pub async fn list_documents(&self) -> Result<Vec<Document>> {
		let mut docs = self.find_documents(None).await?;
		docs.sort_by(|a, b| a.file_path.cmp(&b.file_path));
		Ok(docs)
	}

	/// Removes the row; `false` if no such document existed.
	pub async fn delete_document(&self, document_id: &str) -> Result<bool> {
		let predicate = format!("document_id = {}", sql_quote(document_id));
		let existed = self.documents.count_rows(Some(predicate.clone())).await? > 0;
		if existed {
			self.documents.delete(&predicate).await?;
		}
		Ok(existed)
	}

	pub async fn count_documents(&self) -> Result<usize> {
		Ok(self.documents.count_rows(None).await?)
	}

	async fn find_documents(&self, predicate: Option<&str>) -> Result<Vec<Document>> {
		let mut out = Vec::new();
		for batch in scan(&self.documents, predicate).await? {
			let ids = strings(&batch, "document_id")?;
			let paths = strings(&batch, "file_path")?;
			let names = strings(&batch, "file_name")?;
			let hashes = strings(&batch, "content_hash")?;
			let modified = timestamps(&batch, "modified_at")?;
			let tags = strings(&batch, "tags")?;
			for i in 0..batch.num_rows() {
				out.push(Document {
					document_id: ids.value(i).to_string(),
					file_path: paths.value(i).to_string(),
					file_name: names.value(i).to_string(),
					content_hash: hashes.value(i).to_string(),
					modified_at: time(modified, i),
					tags: parse_tags(tags.value(i)),
				});
			}
		}
		Ok(out)
	}

	// ----- index queue -----

	/// New pending item, or the existing pending item for `file_path` with
	/// its change kind updated.
	pub async fn enqueue(&self, file_path: &str, change: ChangeKind) -> Result<IndexQueueItem> {
		let predicate = format!("file_path = {} AND status = 'pending'", sql_quote(file_path));
		if let Some((seq, mut existing)) = self.load_queue(Some(&predicate)).await?.into_iter().next() {
			existing.change = change;
			self.write_queue(&[(seq, existing.clone())]).await?;
			return Ok(existing);
		}
		let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) as i64 + 1;
		let item = IndexQueueItem {
			id: format!("q{seq}"),
			file_path: file_path.to_string(),
			change,
			status: QueueItemStatus::Pending,
			attempts: 0,
			enqueued_at: Utc::now(),
			started_at: None,
			last_error: None,
		};
		self.write_queue(&[(seq, item.clone())]).await?;
		Ok(item)
	}

	/// Oldest `limit` pending items, flipped to processing.
	pub async fn claim(&self, limit: usize) -> Result<Vec<IndexQueueItem>> {
		if limit == 0 {
			return Ok(Vec::new());
		}
		let mut pending = self.load_queue(Some("status = 'pending'")).await?;
		pending.truncate(limit);
		let now = Utc::now();
		for (_, item) in pending.iter_mut() {
			item.status = QueueItemStatus::Processing;
			item.started_at = Some(now);
		}
		self.write_queue(&pending).await?;
		Ok(pending.into_iter().map(|(_, item)| item).collect())
	}

	pub async fn get_queue_item(&self, id: &str) -> Result<Option<(i64, IndexQueueItem)>> {
		Ok(self.load_queue(Some(&format!("id = {}", sql_quote(id)))).await?.into_iter().next())
	}

	pub async fn put_queue_item(&self, seq: i64, item: IndexQueueItem) -> Result<()> {
		self.write_queue(&[(seq, item)]).await
	}

	pub async fn list_queue(&self, status: Option<QueueItemStatus>) -> Result<Vec<IndexQueueItem>> {
		let predicate = status.map(|s| format!("status = {}", sql_quote(s.as_str())));
		Ok(self.load_queue(predicate.as_deref()).await?.into_iter().map(|(_, item)| item).collect())
	}

	pub async fn queue_status(&self) -> Result<QueueStatus> {
		Ok(QueueStatus {
			pending: self.count_status(QueueItemStatus::Pending).await?,
			processing: self.count_status(QueueItemStatus::Processing).await?,
			completed: self.count_status(QueueItemStatus::Completed).await?,
			failed: self.count_status(QueueItemStatus::Failed).await?,
		})
	}

	async fn count_status(&self, status: QueueItemStatus) -> Result<usize> {
		Ok(self.queue.count_rows(Some(format!("status = {}", sql_quote(status.as_str())))).await?)
	}

	/// Every processing item back to pending.
	pub async fn reset_processing(&self) -> Result<usize> {
		let mut stale = self.load_queue(Some("status = 'processing'")).await?;
		for (_, item) in stale.iter_mut() {
			item.status = QueueItemStatus::Pending;
			item.started_at = None;
		}
		self.write_queue(&stale).await?;
		Ok(stale.len())
	}

	pub async fn clear_completed(&self) -> Result<usize> {
		let predicate = "status = 'completed'";
		let n = self.queue.count_rows(Some(predicate.to_string())).await?;
		if n > 0 {
			self.queue.delete(predicate).await?;
		}
		Ok(n)
	}

	async fn load_queue(&self, predicate: Option<&str>) -> Result<Vec<(i64, IndexQueueItem)>> {
		let mut out = Vec::new();
		for batch in scan(&self.queue, predicate).await? {
			let ids = strings(&batch, "id")?;
			let seqs = int64s(&batch, "seq")?;
			let paths = strings(&batch, "file_path")?;
			let changes = strings(&batch, "change")?;
			let statuses = strings(&batch, "status")?;
			let attempts = int32s(&batch, "attempts")?;
			let enqueued = timestamps(&batch, "enqueued_at")?;
			let started = timestamps(&batch, "started_at")?;
			let errors = strings(&batch, "last_error")?;
			for i in 0..batch.num_rows() {
				let item = IndexQueueItem {
					id: ids.value(i).to_string(),
					file_path: paths.value(i).to_string(),
					change: changes.value(i).parse().map_err(|e| anyhow!("{e}"))?,
					status: statuses.value(i).parse().map_err(|e| anyhow!("{e}"))?,
					attempts: attempts.value(i).max(0) as u32,
					enqueued_at: time(enqueued, i),
					started_at: opt_time(started, i),
					last_error: opt_string(errors, i),
				};
				out.push((seqs.value(i), item));
			}
		}
		out.sort_by_key(|(seq, _)| *seq);
		Ok(out)
	}

	async fn write_queue(&self, items: &[(i64, IndexQueueItem)]) -> Result<()> {
		if items.is_empty() {
			return Ok(());
		}
		let batch = RecordBatch::try_new(build_queue_schema(), vec![
			Arc::new(StringArray::from(items.iter().map(|(_, i)| i.id.clone()).collect::<Vec<_>>())),
			Arc::new(Int64Array::from(items.iter().map(|(seq, _)| *seq).collect::<Vec<_>>())),
			Arc::new(StringArray::from(items.iter().map(|(_, i)| i.file_path.clone()).collect::<Vec<_>>())),
			Arc::new(StringArray::from(items.iter().map(|(_, i)| i.change.as_str()).collect::<Vec<_>>())),
			Arc::new(StringArray::from(items.iter().map(|(_, i)| i.status.as_str()).collect::<Vec<_>>())),
			Arc::new(Int32Array::from(items.iter().map(|(_, i)| i.attempts as i32).collect::<Vec<_>>())),
			Arc::new(TimestampMillisecondArray::from(items.iter().map(|(_, i)| i.enqueued_at.timestamp_millis()).collect::<Vec<_>>())),
			Arc::new(TimestampMillisecondArray::from(items.iter().map(|(_, i)| i.started_at.map(|t| t.timestamp_millis())).collect::<Vec<_>>())),
			Arc::new(StringArray::from(items.iter().map(|(_, i)| i.last_error.clone()).collect::<Vec<_>>())),
		])?;
		upsert(&self.queue, &["id"], batch).await
	}

	// ----- key/value settings -----

	pub async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
		let rb = RecordBatch::try_new(
			build_meta_schema(),
			vec![
				Arc::new(StringArray::from(vec![key.to_string()])),
				Arc::new(StringArray::from(vec![value.to_string()])),
				Arc::new(TimestampMillisecondArray::from(vec![Utc::now().timestamp_millis()])),
			],
		)?;
		// key is unique
		upsert(&self.meta, &["key"], rb).await
	}

	pub async fn get_meta(&self, key: &str) -> Result<Option<String>> {
		for batch in scan(&self.meta, Some(&format!("key = {}", sql_quote(key)))).await? {
			if batch.num_rows() == 0 { continue; }
			let val = strings(&batch, "value")?;
			return Ok(Some(val.value(0).to_string()));
		}
		Ok(None)
	}
}
