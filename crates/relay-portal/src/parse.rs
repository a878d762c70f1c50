//! HTML parsing of the portal pages (login form, listing, detail page).
//!
//! Pure functions over page text so they can be tested against fixtures. The
//! selectors match the portal's Drupal markup.

use reqwest::Url;
use scraper::{ElementRef, Html, Selector};

use relay_core::{
    domain::{Announcement, AnnouncementId, Attachment},
    errors::Error,
    formatting::break_after_signoff,
    Result,
};

const LISTING_TABLE: &str = "tbody";
const LISTING_ROW: &str = "tr";
const CREATED_CELL: &str = "td.views-field-created";
const TITLE_LINK: &str = "td.views-field-title a[href]";
const BODY_REGION: &str = "div.field--name-body";
const BODY_PARAGRAPH: &str = "p";
const ATTACHMENT_LINK: &str = "div.field--name-field-documentos a[href]";

/// Anti-forgery tokens of the login form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoginForm {
    pub form_build_id: String,
    pub form_id: String,
}

fn selector(css: &'static str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| Error::Parse(format!("bad selector `{css}`: {e:?}")))
}

/// Extract `form_build_id` and `form_id` from the login page.
pub fn parse_login_form(html: &str) -> Result<LoginForm> {
    let doc = Html::parse_document(html);
    let input_value = |name: &'static str| -> Result<String> {
        let sel = Selector::parse(&format!("input[name=\"{name}\"]"))
            .map_err(|e| Error::Parse(format!("bad selector for `{name}`: {e:?}")))?;
        let value = doc
            .select(&sel)
            .find_map(|el| el.value().attr("value"))
            .map(str::to_string);
        value.ok_or_else(|| Error::Auth(format!("login form token `{name}` not found")))
    };

    Ok(LoginForm {
        form_build_id: input_value("form_build_id")?,
        form_id: input_value("form_id")?,
    })
}

/// Parse the listing table, keeping rows whose timestamp starts with `today`.
///
/// Rows without a title link or timestamp cell are skipped. Fails only when the
/// page has no table body at all.
pub fn parse_listing(html: &str, base: &Url, today: &str) -> Result<Vec<Announcement>> {
    let doc = Html::parse_document(html);
    let table_sel = selector(LISTING_TABLE)?;
    let row_sel = selector(LISTING_ROW)?;
    let created_sel = selector(CREATED_CELL)?;
    let title_sel = selector(TITLE_LINK)?;

    let table = doc
        .select(&table_sel)
        .next()
        .ok_or_else(|| Error::Parse("announcement table not found".to_string()))?;

    let mut out = Vec::new();
    for row in table.select(&row_sel) {
        let Some(link) = row.select(&title_sel).next() else {
            continue;
        };
        let Some(created) = row.select(&created_sel).next() else {
            tracing::debug!("listing row without timestamp cell, skipping");
            continue;
        };

        let timestamp = collapse_whitespace(&element_text(created));
        if !timestamp.starts_with(today) {
            continue;
        }

        let href = link.value().attr("href").unwrap_or_default();
        let Some(id) = AnnouncementId::from_link(href) else {
            tracing::debug!(href, "listing link without an id segment, skipping");
            continue;
        };
        let Ok(url) = base.join(href) else {
            tracing::debug!(href, "unresolvable listing link, skipping");
            continue;
        };

        out.push(Announcement {
            id,
            timestamp,
            title: collapse_whitespace(&element_text(link)),
            link: url.to_string(),
        });
    }
    Ok(out)
}

/// Paragraph text of the body region joined by blank lines, or `None` without a body region.
pub fn parse_body(html: &str, signoff_marker: &str) -> Result<Option<String>> {
    let doc = Html::parse_document(html);
    let region_sel = selector(BODY_REGION)?;
    let p_sel = selector(BODY_PARAGRAPH)?;

    let Some(region) = doc.select(&region_sel).next() else {
        return Ok(None);
    };

    let text = region
        .select(&p_sel)
        .map(|p| collapse_whitespace(&element_text(p)))
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");

    Ok(Some(break_after_signoff(&text, signoff_marker)))
}

/// Every link in the attachments region, resolved against `base`.
pub fn parse_attachments(html: &str, base: &Url) -> Result<Vec<Attachment>> {
    let doc = Html::parse_document(html);
    let link_sel = selector(ATTACHMENT_LINK)?;

    let mut out = Vec::new();
    for link in doc.select(&link_sel) {
        let href = link.value().attr("href").unwrap_or_default();
        let Ok(url) = base.join(href) else {
            tracing::debug!(href, "unresolvable attachment link, skipping");
            continue;
        };

        let mut name = collapse_whitespace(&element_text(link));
        if name.is_empty() {
            name = url
                .path_segments()
                .and_then(|mut s| s.next_back())
                .filter(|s| !s.is_empty())
                .unwrap_or("document")
                .to_string();
        }

        out.push(Attachment {
            name,
            url: url.to_string(),
        });
    }
    Ok(out)
}

/// Text content of an element, skipping `<script>` and `<style>` contents.
fn element_text(el: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in el.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| matches!(e.name(), "script" | "style"))
        });
        if !hidden {
            out.push_str(text);
        }
    }
    out
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
