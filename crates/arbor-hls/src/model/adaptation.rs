use super::{ContainerType, Representation, StreamType};

/// A group of representations interchangeable at runtime.
#[derive(Clone, Debug)]
pub struct AdaptationSet {
    pub stream_type: StreamType,
    /// BCP-47 language tag, `"unk"` when the playlist does not say.
    pub language: String,
    pub name: String,
    pub is_default: bool,
    pub is_forced: bool,
    pub container_type: ContainerType,
    pub representations: Vec<Representation>,
}

impl AdaptationSet {
    pub fn new(stream_type: StreamType) -> Self {
        Self {
            stream_type,
            language: "unk".to_string(),
            name: String::new(),
            is_default: false,
            is_forced: false,
            container_type: ContainerType::NoType,
            representations: Vec::new(),
        }
    }

    /// Duplicate structure for a discontinuity split; representations keep
    /// their positions but start with empty timelines.
    pub fn copy_structure(&self) -> Self {
        Self {
            stream_type: self.stream_type,
            language: self.language.clone(),
            name: self.name.clone(),
            is_default: self.is_default,
            is_forced: self.is_forced,
            container_type: self.container_type,
            representations: self
                .representations
                .iter()
                .map(Representation::copy_structure)
                .collect(),
        }
    }
}
