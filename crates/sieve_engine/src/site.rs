use serde::{Deserialize, Serialize};
use url::Url;

use crate::{FailureKind, FetchError};

/// How category pages and item pages of the crawled site are addressed.
///
/// Category page `p` of `category` is `{base_url}{category}?{extra_query}&{page_query}={p}`;
/// item refs found on tiles are resolved against `base_url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteLayout {
    pub base_url: String,
    #[serde(default = "default_page_query")]
    pub page_query: String,
    #[serde(default)]
    pub extra_query: Vec<(String, String)>,
}

fn default_page_query() -> String {
    "page".to_string()
}

impl SiteLayout {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            page_query: default_page_query(),
            extra_query: Vec::new(),
        }
    }

    pub fn category_page_url(&self, category: &str, page: u32) -> Result<String, FetchError> {
        let mut url = self.base()?.join(category).map_err(invalid_url)?;
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in &self.extra_query {
                query.append_pair(key, value);
            }
            query.append_pair(&self.page_query, &page.to_string());
        }
        Ok(url.into())
    }

    pub fn item_url(&self, item_ref: &str) -> Result<String, FetchError> {
        let item_ref = item_ref.trim();
        if item_ref.is_empty() {
            return Err(FetchError::new(FailureKind::InvalidUrl, "empty item ref"));
        }
        Ok(self.base()?.join(item_ref).map_err(invalid_url)?.into())
    }

    fn base(&self) -> Result<Url, FetchError> {
        Url::parse(&self.base_url).map_err(invalid_url)
    }
}

fn invalid_url(err: url::ParseError) -> FetchError {
    FetchError::new(FailureKind::InvalidUrl, err.to_string())
}
