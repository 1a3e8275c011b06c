use std::{fmt, ops::Index, sync::Arc};

use url::Url;

use crate::{CoordKvError, Result};

/// Ordered, immutable list of candidate server base URLs.
///
/// Cloning is cheap; every request issued by one client shares the same list.
#[derive(Clone, PartialEq, Eq)]
pub struct EndpointSet {
    uris: Arc<[Url]>,
}

impl EndpointSet {
    /// Builds an endpoint set from base URLs such as `http://10.0.0.1:2379`.
    ///
    /// Fails when the list is empty or an entry is not an `http`/`https` URL
    /// with a host.
    pub fn new<I, S>(uris: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let uris = uris
            .into_iter()
            .map(|raw| parse_endpoint(raw.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        if uris.is_empty() {
            return Err(CoordKvError::Config(
                "endpoint list cannot be empty".to_owned(),
            ));
        }

        Ok(Self { uris: uris.into() })
    }

    /// Parses a comma separated endpoint list, ignoring blank entries.
    ///
    /// Example: `"http://a:2379, http://b:2379"`.
    pub fn parse(list: &str) -> Result<Self> {
        Self::new(
            list.split(',')
                .map(str::trim)
                .filter(|entry| !entry.is_empty()),
        )
    }

    pub fn len(&self) -> usize {
        self.uris.len()
    }

    /// Always `false`; construction rejects empty lists.
    pub fn is_empty(&self) -> bool {
        self.uris.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Url> {
        self.uris.iter()
    }

    pub(crate) fn shared(&self) -> Arc<[Url]> {
        Arc::clone(&self.uris)
    }
}

impl Index<usize> for EndpointSet {
    type Output = Url;

    fn index(&self, index: usize) -> &Url {
        &self.uris[index]
    }
}

impl fmt::Debug for EndpointSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.uris.iter().map(Url::as_str))
            .finish()
    }
}

fn parse_endpoint(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|err| CoordKvError::Config(format!("invalid endpoint '{raw}': {err}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(CoordKvError::Config(format!(
            "unsupported endpoint scheme '{}' in '{raw}'",
            url.scheme()
        )));
    }
    if url.host_str().is_none() {
        return Err(CoordKvError::Config(format!(
            "endpoint '{raw}' has no host"
        )));
    }

    Ok(url)
}
