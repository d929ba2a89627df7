//! Encyclopedia article categories and intro extracts.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use scraper::{Html, Selector};
use serde::Deserialize;
use wikimatch_match_models::{Entity, NameCandidate, NameProvenance};

use crate::{KnowledgeBase, WikidataError, entity::enwiki_title};

/// Titles per categories request.
pub const PAGE_SIZE: usize = 50;

/// Titles per extracts request; the API caps intro extracts at 20.
pub const EXTRACTS_PAGE_SIZE: usize = 20;

const CATEGORY_PREFIX: &str = "Category:";

static BOLD: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("b").expect("valid selector"));

#[derive(Debug, Deserialize)]
pub(crate) struct PagesResponse {
    pub query: PagesQuery,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PagesQuery {
    #[serde(default)]
    pub pages: Vec<Page>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Page {
    pub title: String,
    #[serde(default)]
    pub categories: Option<Vec<CategoryRef>>,
    #[serde(default)]
    pub extract: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CategoryRef {
    pub title: String,
}

/// Category names per page title. Redirect pages, which carry no
/// categories, are left out.
pub(crate) fn categories_from_pages(pages: Vec<Page>) -> BTreeMap<String, Vec<String>> {
    pages
        .into_iter()
        .filter_map(|page| {
            let cats = page
                .categories?
                .into_iter()
                .map(|c| {
                    c.title
                        .strip_prefix(CATEGORY_PREFIX)
                        .map_or_else(|| c.title.clone(), ToString::to_string)
                })
                .collect();
            Some((page.title, cats))
        })
        .collect()
}

/// Non-empty intro extracts per page title.
pub(crate) fn extracts_from_pages(pages: Vec<Page>) -> BTreeMap<String, String> {
    pages
        .into_iter()
        .filter_map(|page| {
            let extract = page.extract?;
            (!extract.trim().is_empty()).then_some((page.title, extract))
        })
        .collect()
}

/// Bold names in an extract, skipping pronunciation guides (inside
/// `<small>`) and lists.
#[must_use]
pub fn html_names(extract: &str) -> Vec<String> {
    if extract.trim().is_empty() {
        return Vec::new();
    }
    let html = Html::parse_fragment(extract);
    html.select(&BOLD)
        .filter(|b| {
            !b.ancestors().any(|node| {
                node.value()
                    .as_element()
                    .is_some_and(|e| e.name() == "small" || e.name() == "ul")
            })
        })
        .map(|b| b.text().collect::<String>())
        .filter(|name| name.chars().count() > 1)
        .map(|name| name.trim().to_string())
        .collect()
}

/// Adds encyclopedia categories, the intro extract and the bold names from
/// it to every entity with an English article.
///
/// # Errors
///
/// Returns [`WikidataError`] if a categories or extracts request fails.
pub async fn enrich<K: KnowledgeBase + ?Sized>(
    kb: &K,
    entities: &mut [Entity],
) -> Result<(), WikidataError> {
    let titles: Vec<String> = entities
        .iter()
        .filter_map(|e| enwiki_title(e).map(ToString::to_string))
        .collect();
    if titles.is_empty() {
        return Ok(());
    }

    let mut categories = BTreeMap::new();
    for page in titles.chunks(PAGE_SIZE) {
        categories.extend(kb.get_categories(page).await?);
    }
    let mut extracts = BTreeMap::new();
    for page in titles.chunks(EXTRACTS_PAGE_SIZE) {
        extracts.extend(kb.get_extracts(page).await?);
    }
    log::debug!(
        "{} articles: {} with categories, {} with extracts",
        titles.len(),
        categories.len(),
        extracts.len()
    );

    for entity in entities.iter_mut() {
        let Some(title) = enwiki_title(entity).map(ToString::to_string) else {
            continue;
        };
        if let Some(cats) = categories.remove(&title) {
            entity.categories = cats;
        }
        if let Some(extract) = extracts.remove(&title) {
            for name in html_names(&extract) {
                entity
                    .names
                    .push(NameCandidate::new(name, NameProvenance::Extract, "enwiki"));
            }
            entity.extract = Some(extract);
        }
    }
    Ok(())
}
