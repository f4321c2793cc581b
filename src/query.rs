use std::collections::BTreeMap;

use url::Url;

use crate::{Result, TransportError};

/// Merges `params` into the query string of `raw_url`, replacing any
/// existing values for the same keys. The resulting query is sorted by key.
pub fn add_query_params<I, K, V>(raw_url: &str, params: I) -> Result<String>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let mut url = parse(raw_url)?;
    let mut query = existing_query(&url);
    for (key, value) in params {
        query.insert(key.into(), vec![value.into()]);
    }
    write_query(&mut url, &query);
    Ok(url.into())
}

/// Appends one `key=value` pair per entry of `values`, keeping any values
/// already present for `key`.
pub fn add_array_query_params<I, V>(raw_url: &str, key: &str, values: I) -> Result<String>
where
    I: IntoIterator<Item = V>,
    V: Into<String>,
{
    let mut url = parse(raw_url)?;
    let mut query = existing_query(&url);
    query
        .entry(key.to_owned())
        .or_default()
        .extend(values.into_iter().map(Into::into));
    write_query(&mut url, &query);
    Ok(url.into())
}

fn parse(raw_url: &str) -> Result<Url> {
    Url::parse(raw_url).map_err(|source| TransportError::InvalidUrl {
        url: raw_url.to_owned(),
        source,
    })
}

fn existing_query(url: &Url) -> BTreeMap<String, Vec<String>> {
    let mut query: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, value) in url.query_pairs() {
        query
            .entry(key.into_owned())
            .or_default()
            .push(value.into_owned());
    }
    query
}

fn write_query(url: &mut Url, query: &BTreeMap<String, Vec<String>>) {
    if query.values().all(Vec::is_empty) {
        url.set_query(None);
        return;
    }

    let mut pairs = url.query_pairs_mut();
    pairs.clear();
    for (key, values) in query {
        for value in values {
            pairs.append_pair(key, value);
        }
    }
}
