//! Prefetch profiles
//!
//! A caller-declared bundle of message data to fetch for a batch of
//! messages in one round trip. The folder engine uses the profile both
//! to build the FETCH item list and to decide which messages already
//! satisfy it.

/// What to prefetch for a batch of messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchProfile {
    /// `UID`.
    pub uid: bool,
    /// `ENVELOPE INTERNALDATE RFC822.SIZE`.
    pub envelope: bool,
    /// `FLAGS`.
    pub flags: bool,
    /// `BODYSTRUCTURE`.
    pub content_info: bool,
    /// `RFC822.SIZE`.
    pub size: bool,
    /// `BODY.PEEK[HEADER]` — the complete header block.
    pub all_headers: bool,
    /// `BODY.PEEK[HEADER.FIELDS (…)]` — specific headers; ignored when
    /// `all_headers` is set.
    pub headers: Vec<String>,
}

impl FetchProfile {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_uid(mut self) -> Self {
        self.uid = true;
        self
    }

    #[must_use]
    pub const fn with_envelope(mut self) -> Self {
        self.envelope = true;
        self
    }

    #[must_use]
    pub const fn with_flags(mut self) -> Self {
        self.flags = true;
        self
    }

    #[must_use]
    pub const fn with_content_info(mut self) -> Self {
        self.content_info = true;
        self
    }

    #[must_use]
    pub const fn with_size(mut self) -> Self {
        self.size = true;
        self
    }

    #[must_use]
    pub const fn with_all_headers(mut self) -> Self {
        self.all_headers = true;
        self
    }

    #[must_use]
    pub fn with_headers<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.headers.extend(names.into_iter().map(Into::into));
        self
    }

    /// Whether this profile requests anything at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !(self.uid
            || self.envelope
            || self.flags
            || self.content_info
            || self.size
            || self.all_headers)
            && self.headers.is_empty()
    }
}
