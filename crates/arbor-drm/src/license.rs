/// Pipe-separated license-key descriptor.
///
/// Layout: `url_params|headers|_|_|renew_token`. Part 0 is appended to the
/// key URL as query parameters, part 1 is an `&`-separated `Name=Value`
/// header list for the key request, part 4 is an opaque token handed to
/// [`SegmentDecrypter::renew_license`] when a key fetch fails.
///
/// [`SegmentDecrypter::renew_license`]: crate::SegmentDecrypter::renew_license
#[derive(Clone, Debug, Default)]
pub struct LicenseKey {
    parts: Vec<String>,
}

impl LicenseKey {
    pub fn parse(descriptor: &str) -> Self {
        if descriptor.is_empty() {
            return Self::default();
        }
        Self {
            parts: descriptor.split('|').map(str::to_string).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.parts.iter().all(|p| p.is_empty())
    }

    /// Query parameters to append to the key URL (no leading `?`/`&`).
    pub fn url_params(&self) -> Option<&str> {
        self.part(0)
    }

    /// Extra request headers for the key fetch.
    pub fn headers(&self) -> Vec<(String, String)> {
        let Some(raw) = self.part(1) else {
            return Vec::new();
        };
        raw.split('&')
            .filter_map(|pair| {
                let (name, value) = pair.split_once('=')?;
                if name.is_empty() {
                    return None;
                }
                Some((name.to_string(), value.to_string()))
            })
            .collect()
    }

    /// Renewal token, if the descriptor carries one.
    pub fn renew_token(&self) -> Option<&str> {
        self.part(4)
    }

    fn part(&self, index: usize) -> Option<&str> {
        self.parts
            .get(index)
            .map(String::as_str)
            .filter(|p| !p.is_empty())
    }
}

impl From<&str> for LicenseKey {
    fn from(descriptor: &str) -> Self {
        Self::parse(descriptor)
    }
}
