//! SMTP extension types.

use std::collections::HashMap;

/// Extensions advertised in an `EHLO` reply.
///
/// Keywords are stored upper-cased, so lookups are case-insensitive.
/// Parameters keep the order the server sent them in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extensions {
    keywords: HashMap<String, Vec<String>>,
}

impl Extensions {
    /// Creates an empty extension map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a keyword unless it is already present.
    ///
    /// Returns `false` for duplicates, leaving the first entry untouched.
    pub fn insert(&mut self, keyword: &str, parameters: Vec<String>) -> bool {
        let keyword = keyword.to_ascii_uppercase();
        if self.keywords.contains_key(&keyword) {
            return false;
        }
        self.keywords.insert(keyword, parameters);
        true
    }

    /// Checks if the server advertised `keyword`.
    #[must_use]
    pub fn contains(&self, keyword: &str) -> bool {
        self.keywords.contains_key(&keyword.to_ascii_uppercase())
    }

    /// Returns the parameters of `keyword`, if advertised.
    #[must_use]
    pub fn parameters(&self, keyword: &str) -> Option<&[String]> {
        self.keywords
            .get(&keyword.to_ascii_uppercase())
            .map(Vec::as_slice)
    }

    /// Returns the number of advertised keywords.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keywords.len()
    }

    /// Returns true if nothing was advertised.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    /// Returns the SASL mechanisms listed after `AUTH`.
    ///
    /// Mechanisms this crate does not implement are dropped.
    #[must_use]
    pub fn auth_mechanisms(&self) -> Vec<AuthMechanism> {
        self.parameters("AUTH")
            .unwrap_or_default()
            .iter()
            .filter_map(|m| AuthMechanism::parse(m))
            .collect()
    }

    /// Checks if a SASL mechanism is listed after `AUTH`.
    #[must_use]
    pub fn supports_auth(&self, mechanism: AuthMechanism) -> bool {
        self.auth_mechanisms().contains(&mechanism)
    }

    /// Returns the maximum message size from the `SIZE` keyword.
    ///
    /// A missing, zero or non-numeric value means no limit is known.
    #[must_use]
    pub fn max_message_size(&self) -> Option<u64> {
        let parameter = self.parameters("SIZE")?.first()?;
        match parameter.parse::<u64>() {
            Ok(0) => None,
            Ok(size) => Some(size),
            Err(_) => {
                tracing::debug!(parameter, "SIZE parameter is not a valid integer");
                None
            }
        }
    }
}

impl<'a> FromIterator<(&'a str, Vec<String>)> for Extensions {
    fn from_iter<T: IntoIterator<Item = (&'a str, Vec<String>)>>(iter: T) -> Self {
        let mut extensions = Self::new();
        for (keyword, parameters) in iter {
            extensions.insert(keyword, parameters);
        }
        extensions
    }
}

/// SASL authentication mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMechanism {
    /// PLAIN - plaintext authentication
    Plain,
    /// LOGIN - legacy plaintext
    Login,
    /// CRAM-MD5 - challenge-response
    CramMd5,
    /// `XOAUTH2` - `OAuth2` (Google/Microsoft)
    XOAuth2,
    /// EXTERNAL - TLS client certificate
    External,
}

impl AuthMechanism {
    /// Parses an authentication mechanism name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PLAIN" => Some(Self::Plain),
            "LOGIN" => Some(Self::Login),
            "CRAM-MD5" => Some(Self::CramMd5),
            "XOAUTH2" => Some(Self::XOAuth2),
            "EXTERNAL" => Some(Self::External),
            _ => None,
        }
    }

    /// Returns the mechanism name as a string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
            Self::CramMd5 => "CRAM-MD5",
            Self::XOAuth2 => "XOAUTH2",
            Self::External => "EXTERNAL",
        }
    }
}

impl std::fmt::Display for AuthMechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
