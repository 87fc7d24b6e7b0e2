use arbor_net::Headers;

/// Tuning knobs for an [`HlsTree`].
///
/// [`HlsTree`]: crate::HlsTree
#[derive(Clone, Debug)]
pub struct HlsOptions {
    /// Buffer duration every representation should be able to sustain, in seconds.
    pub buffer_assured_duration_secs: u32,
    /// Upper bound on buffered media per representation, in seconds.
    pub buffer_max_duration_secs: u32,
    /// Extra headers sent with every manifest request.
    pub manifest_headers: Option<Headers>,
}

impl Default for HlsOptions {
    fn default() -> Self {
        Self {
            buffer_assured_duration_secs: 60,
            buffer_max_duration_secs: 120,
            manifest_headers: None,
        }
    }
}

impl HlsOptions {
    /// Set buffer duration hints.
    pub fn with_buffer_durations(mut self, assured_secs: u32, max_secs: u32) -> Self {
        self.buffer_assured_duration_secs = assured_secs;
        self.buffer_max_duration_secs = max_secs;
        self
    }

    /// Set extra manifest request headers.
    pub fn with_manifest_headers(mut self, headers: Headers) -> Self {
        self.manifest_headers = Some(headers);
        self
    }
}
