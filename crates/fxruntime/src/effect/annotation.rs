use std::collections::BTreeMap;

/// Typed value attached to a uniform, texture or technique by the effect
/// author.
#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationValue {
    Bool(Vec<bool>),
    Int(Vec<i32>),
    Uint(Vec<u32>),
    Float(Vec<f32>),
    String(String),
}

impl AnnotationValue {
    pub fn as_bool(&self, index: usize) -> Option<bool> {
        match self {
            AnnotationValue::Bool(values) => values.get(index).copied(),
            AnnotationValue::Int(values) => values.get(index).map(|v| *v != 0),
            AnnotationValue::Uint(values) => values.get(index).map(|v| *v != 0),
            AnnotationValue::Float(values) => values.get(index).map(|v| *v != 0.0),
            AnnotationValue::String(text) => match text.as_str() {
                "true" | "1" => Some(true),
                "false" | "0" => Some(false),
                _ => None,
            },
        }
    }

    pub fn as_int(&self, index: usize) -> Option<i32> {
        match self {
            AnnotationValue::Bool(values) => values.get(index).map(|v| i32::from(*v)),
            AnnotationValue::Int(values) => values.get(index).copied(),
            AnnotationValue::Uint(values) => values.get(index).map(|v| *v as i32),
            AnnotationValue::Float(values) => values.get(index).map(|v| *v as i32),
            AnnotationValue::String(text) => text.trim().parse().ok(),
        }
    }

    pub fn as_uint(&self, index: usize) -> Option<u32> {
        match self {
            AnnotationValue::Bool(values) => values.get(index).map(|v| u32::from(*v)),
            AnnotationValue::Int(values) => values.get(index).map(|v| *v as u32),
            AnnotationValue::Uint(values) => values.get(index).copied(),
            AnnotationValue::Float(values) => values.get(index).map(|v| *v as u32),
            AnnotationValue::String(text) => text.trim().parse().ok(),
        }
    }

    pub fn as_float(&self, index: usize) -> Option<f32> {
        match self {
            AnnotationValue::Bool(values) => {
                values.get(index).map(|v| if *v { 1.0 } else { 0.0 })
            }
            AnnotationValue::Int(values) => values.get(index).map(|v| *v as f32),
            AnnotationValue::Uint(values) => values.get(index).map(|v| *v as f32),
            AnnotationValue::Float(values) => values.get(index).copied(),
            AnnotationValue::String(text) => text.trim().parse().ok(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AnnotationValue::String(text) => Some(text),
            _ => None,
        }
    }
}

/// Name to value map. Lookups of missing names or out-of-range components
/// yield `None`, which callers usually fold into a zero default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Annotations {
    values: BTreeMap<String, AnnotationValue>,
}

impl Annotations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: AnnotationValue) {
        self.values.insert(name.into(), value);
    }

    pub fn with(mut self, name: impl Into<String>, value: AnnotationValue) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&AnnotationValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn bool(&self, name: &str) -> bool {
        self.get(name).and_then(|v| v.as_bool(0)).unwrap_or(false)
    }

    pub fn int(&self, name: &str) -> i32 {
        self.get(name).and_then(|v| v.as_int(0)).unwrap_or(0)
    }

    pub fn uint(&self, name: &str) -> u32 {
        self.get(name).and_then(|v| v.as_uint(0)).unwrap_or(0)
    }

    pub fn float(&self, name: &str) -> f32 {
        self.float_at(name, 0)
    }

    pub fn float_at(&self, name: &str, index: usize) -> f32 {
        self.get(name)
            .and_then(|v| v.as_float(index))
            .unwrap_or(0.0)
    }

    pub fn string(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(AnnotationValue::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AnnotationValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl FromIterator<(String, AnnotationValue)> for Annotations {
    fn from_iter<I: IntoIterator<Item = (String, AnnotationValue)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_annotations_coerce() {
        let annotations = Annotations::new()
            .with("step", AnnotationValue::Float(vec![0.1, 0.4]))
            .with("keycode", AnnotationValue::Int(vec![0x20]))
            .with("toggle", AnnotationValue::Bool(vec![true]));
        assert_eq!(annotations.float_at("step", 1), 0.4);
        assert_eq!(annotations.float_at("step", 2), 0.0);
        assert_eq!(annotations.uint("keycode"), 0x20);
        assert_eq!(annotations.float("toggle"), 1.0);
        assert!(annotations.bool("keycode"));
    }

    #[test]
    fn missing_annotations_default_to_zero() {
        let annotations = Annotations::new();
        assert!(!annotations.bool("enabled"));
        assert_eq!(annotations.int("timeout"), 0);
        assert_eq!(annotations.string("source"), None);
    }
}
