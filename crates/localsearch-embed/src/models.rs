pub const QUERY_PREFIX: &str = "query: ";
pub const PASSAGE_PREFIX: &str = "passage: ";

const KNOWN_DIMENSIONS: &[(&str, usize)] = &[
    ("intfloat/multilingual-e5-small", 384),
    ("intfloat/multilingual-e5-base", 768),
    ("intfloat/multilingual-e5-large", 1024),
    ("Xenova/multilingual-e5-small", 384),
    ("Xenova/multilingual-e5-base", 768),
    ("Xenova/multilingual-e5-large", 1024),
];

pub fn known_dimension(model_id: &str) -> Option<usize> {
    KNOWN_DIMENSIONS.iter().find(|(id, _)| *id == model_id).map(|(_, dim)| *dim)
}

/// E5 models are trained with `query: ` / `passage: ` prefixes.
pub fn is_e5_model(model_id: &str) -> bool {
    model_id.to_lowercase().contains("e5")
}

pub fn query_input(model_id: &str, text: &str) -> String {
    if is_e5_model(model_id) { format!("{QUERY_PREFIX}{text}") } else { text.to_string() }
}

pub fn passage_input(model_id: &str, text: &str) -> String {
    if is_e5_model(model_id) { format!("{PASSAGE_PREFIX}{text}") } else { text.to_string() }
}
