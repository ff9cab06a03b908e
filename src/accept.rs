//! `Accept` header parsing and content negotiation.
//!
//! Header order is preference order. Quality values are kept with the rest of
//! the parameter suffix but never used to re-sort descriptors.

/// One media range from an `Accept` header.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Accept {
    kind: String,
    subtype: Option<String>,
    params: Option<String>,
    mime_type: String,
}

impl Accept {
    /// Parses a single entry such as `text/html;q=0.9`.
    pub fn parse(entry: &str) -> Self {
        let entry = entry.trim();
        let (range, params) = match entry.split_once(';') {
            Some((range, params)) => (range.trim(), Some(params.trim().to_owned())),
            None => (entry, None),
        };

        let (kind, subtype) = match range.split_once('/') {
            Some((kind, subtype)) => (kind.to_owned(), Some(subtype.to_owned())),
            None => (range.to_owned(), None),
        };

        let mime_type = match &subtype {
            Some(subtype) => format!("{kind}/{subtype}"),
            None => kind.clone(),
        }
        .to_ascii_lowercase();

        Self { kind, subtype, params, mime_type }
    }

    /// The top-level type as written in the header (`text` in `text/html`).
    pub fn kind(&self) -> &str { &self.kind }
    pub fn subtype(&self) -> Option<&str> { self.subtype.as_deref() }
    /// Everything after the first `;`, if present.
    pub fn params(&self) -> Option<&str> { self.params.as_deref() }

    /// Lowercase `type/subtype` (or bare `type`), the negotiation key.
    pub fn mime_type(&self) -> &str { &self.mime_type }
}

/// Outcome of [`Accepts::preferred`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Preference<'h, 'c> {
    /// The first candidate (in header order) the client accepts, as the caller spelled it.
    Supported(&'c str),
    /// No candidates were given: the client's first descriptor.
    Preferred(&'h Accept),
}

impl Preference<'_, '_> {
    pub fn mime_type(&self) -> &str {
        match self {
            Self::Supported(candidate) => candidate,
            Self::Preferred(accept) => accept.mime_type(),
        }
    }
}

/// Ordered descriptors parsed from one or more `Accept` header values.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Accepts(Vec<Accept>);

impl Accepts {
    /// Splits a header value on commas. Blank entries are skipped.
    pub fn parse(header: &str) -> Self {
        Self(
            header
                .split(',')
                .filter(|entry| !entry.trim().is_empty())
                .map(Accept::parse)
                .collect(),
        )
    }

    pub fn as_slice(&self) -> &[Accept] { &self.0 }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    /// Picks the response content type.
    ///
    /// Candidates are compared case-insensitively against each descriptor in
    /// header order; the first hit wins. With no candidates the first
    /// descriptor is returned as-is. `None` means the header carried no
    /// descriptors, or none of the candidates are acceptable.
    pub fn preferred<'c>(&self, candidates: &[&'c str]) -> Option<Preference<'_, 'c>> {
        let first = self.0.first()?;
        if candidates.is_empty() {
            return Some(Preference::Preferred(first));
        }

        self.0.iter().find_map(|accept| {
            candidates
                .iter()
                .find(|candidate| candidate.eq_ignore_ascii_case(accept.mime_type()))
                .map(|candidate| Preference::Supported(*candidate))
        })
    }
}
