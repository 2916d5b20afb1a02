use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use scraper::{ElementRef, Html, Selector};
use tracing::{info, warn};
use url::Url;

use crate::config::CrawlerConfig;
use crate::models::ScrapedPage;

/// Link targets that never contain indexable text.
const EXCLUDED_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "zip", "rar", "7z", "tar", "gz", "jpg",
    "jpeg", "png", "gif", "svg", "webp", "ico", "bmp", "mp3", "mp4", "wav", "avi", "mov", "mkv",
    "exe", "dmg", "bin", "css", "js",
];

/// Elements whose text is boilerplate rather than page content.
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "nav", "footer", "aside"];

/// Elements that end a line of visible text.
const BLOCK_ELEMENTS: &[&str] = &[
    "p", "div", "br", "li", "ul", "ol", "h1", "h2", "h3", "h4", "h5", "h6", "section", "article",
    "header", "main", "table", "tr", "blockquote", "pre",
];

/// Lines at or below this length are treated as navigation noise.
const MIN_LINE_CHARS: usize = 10;

/// Breadth-first crawler scoped to the start URL's host.
///
/// Pages that fail to fetch or parse are logged and skipped; a crawl
/// only errors when the start URL itself is unusable.
pub struct WebCrawler {
    client: reqwest::Client,
    config: CrawlerConfig,
}

impl WebCrawler {
    pub fn new(config: &CrawlerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// Crawl up to `max_pages` pages within `max_depth` link hops of the
    /// start URL, never leaving its host.
    pub async fn crawl(&self, start_url: &str) -> Result<Vec<ScrapedPage>> {
        let start = Url::parse(start_url)
            .with_context(|| format!("Invalid start URL: {}", start_url))?;
        if !matches!(start.scheme(), "http" | "https") {
            anyhow::bail!("Start URL must be http or https: {}", start_url);
        }
        if is_excluded(&start) {
            anyhow::bail!("Start URL points at a non-text resource: {}", start_url);
        }

        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(Url, usize)> = VecDeque::new();
        let mut pages: Vec<ScrapedPage> = Vec::new();

        queue.push_back((normalize(&start), 0));

        let delay = Duration::from_millis(self.config.fetch_delay_ms);
        let mut fetched_any = false;

        while let Some((url, depth)) = queue.pop_front() {
            if pages.len() >= self.config.max_pages {
                break;
            }
            if !visited.insert(url.as_str().to_string()) {
                continue;
            }

            if fetched_any && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            fetched_any = true;

            let body = match self.fetch(&url).await {
                Ok(body) => body,
                Err(err) => {
                    warn!(url = %url, error = %err, "failed to fetch page");
                    continue;
                }
            };

            // Html is not Send, so parsing stays inside this block with no
            // awaits until it is dropped.
            let (title, content, links) = {
                let html = Html::parse_document(&body);
                (
                    extract_title(&html),
                    clean_text(&visible_text(&html)),
                    extract_links(&html, &url),
                )
            };

            // Every fetched page counts against max_pages, even when its
            // cleaned text is empty; ingestion drops chunk-less pages later.
            let mut metadata = BTreeMap::new();
            metadata.insert("scraped_at".to_string(), Utc::now().to_rfc3339());
            metadata.insert(
                "domain".to_string(),
                url.host_str().unwrap_or_default().to_string(),
            );
            metadata.insert(
                "content_length".to_string(),
                content.chars().count().to_string(),
            );

            info!(url = %url, depth, chars = content.chars().count(), "scraped page");
            pages.push(ScrapedPage {
                url: url.clone(),
                title,
                content,
                metadata,
            });

            if depth < self.config.max_depth {
                for link in links {
                    if !visited.contains(link.as_str()) {
                        queue.push_back((link, depth + 1));
                    }
                }
            }
        }

        info!(pages = pages.len(), "crawl finished");
        Ok(pages)
    }

    async fn fetch(&self, url: &Url) -> Result<String> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await?
            .error_for_status()?;

        if let Some(content_type) = response.headers().get(reqwest::header::CONTENT_TYPE) {
            let content_type = content_type.to_str().unwrap_or_default();
            if !content_type.contains("text/html") {
                anyhow::bail!("Not an HTML page: {}", content_type);
            }
        }

        Ok(response.text().await?)
    }
}

fn normalize(url: &Url) -> Url {
    let mut url = url.clone();
    url.set_fragment(None);
    url
}

fn extract_title(html: &Html) -> String {
    let selector = Selector::parse("title").unwrap();
    let title = html
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>())
        .unwrap_or_default();
    let title = title.trim();
    if title.is_empty() {
        "Untitled".to_string()
    } else {
        title.to_string()
    }
}

/// Collect body text nodes, skipping boilerplate elements and inserting
/// line breaks after block-level elements. Head content (title, meta) is
/// never part of the page text.
fn visible_text(html: &Html) -> String {
    let selector = Selector::parse("body").unwrap();
    let mut out = String::new();
    if let Some(body) = html.select(&selector).next() {
        collect_text(body, &mut out);
    }
    out
}

fn collect_text(el: ElementRef, out: &mut String) {
    let name = el.value().name();
    if SKIPPED_ELEMENTS.contains(&name) {
        return;
    }
    for child in el.children() {
        if let Some(child_el) = ElementRef::wrap(child) {
            collect_text(child_el, out);
        } else if let Some(text) = child.value().as_text() {
            out.push_str(text);
        }
    }
    if BLOCK_ELEMENTS.contains(&name) {
        out.push('\n');
    }
}

/// Trim lines and drop short ones; menus, button labels and similar
/// fragments carry no retrievable content.
fn clean_text(raw: &str) -> String {
    raw.lines()
        .map(str::trim)
        .filter(|line| line.chars().count() > MIN_LINE_CHARS)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Same-authority http(s) links from anchor tags, with fragments
/// stripped, binary targets excluded, and duplicates removed in
/// document order.
fn extract_links(html: &Html, base: &Url) -> Vec<Url> {
    let selector = Selector::parse("a[href]").unwrap();
    let mut seen: HashSet<String> = HashSet::new();
    let mut links = Vec::new();

    for anchor in html.select(&selector) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let Ok(link) = base.join(href) else {
            continue;
        };
        if !matches!(link.scheme(), "http" | "https") {
            continue;
        }
        if link.authority() != base.authority() {
            continue;
        }
        if is_excluded(&link) {
            continue;
        }
        let link = normalize(&link);
        if seen.insert(link.as_str().to_string()) {
            links.push(link);
        }
    }

    links
}

fn is_excluded(url: &Url) -> bool {
    Path::new(url.path())
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| EXCLUDED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(body: &str) -> Html {
        Html::parse_document(body)
    }

    #[test]
    fn test_title_extracted() {
        let html = page("<html><head><title> Rust Guide </title></head><body></body></html>");
        assert_eq!(extract_title(&html), "Rust Guide");
    }

    #[test]
    fn test_missing_title_falls_back_to_untitled() {
        let html = page("<html><body><p>content</p></body></html>");
        assert_eq!(extract_title(&html), "Untitled");
    }

    #[test]
    fn test_boilerplate_elements_are_skipped() {
        let html = page(
            "<html><body>\
             <nav>Navigation menu with many links here</nav>\
             <script>var tracking = 'should never appear';</script>\
             <style>.hidden { display: none; }</style>\
             <p>This paragraph is the actual page content.</p>\
             <footer>Copyright notice in the page footer</footer>\
             </body></html>",
        );
        let text = clean_text(&visible_text(&html));
        assert!(text.contains("actual page content"));
        assert!(!text.contains("Navigation menu"));
        assert!(!text.contains("tracking"));
        assert!(!text.contains("display: none"));
        assert!(!text.contains("Copyright"));
    }

    #[test]
    fn test_head_text_never_fuses_into_body_content() {
        let html = page(
            "<html><head><title>Page A</title><meta name=\"x\" content=\"y\"></head>\
             <body><p>Page A explains the installation steps in careful detail.</p>\
             </body></html>",
        );
        let text = clean_text(&visible_text(&html));
        assert_eq!(
            text,
            "Page A explains the installation steps in careful detail."
        );
    }

    #[test]
    fn test_clean_text_drops_short_lines() {
        let raw = "  Home  \nA sentence long enough to keep around.\nOK\n";
        let cleaned = clean_text(raw);
        assert_eq!(cleaned, "A sentence long enough to keep around.");
    }

    #[test]
    fn test_extract_links_stays_on_host() {
        let base = Url::parse("https://example.com/docs/index.html").unwrap();
        let html = page(
            r##"<html><body>
             <a href="/docs/intro">Intro</a>
             <a href="guide.html">Guide</a>
             <a href="https://example.com/api">API</a>
             <a href="https://other.com/away">Away</a>
             <a href="mailto:team@example.com">Mail</a>
             <a href="manual.pdf">Manual</a>
             <a href="/docs/intro#section">Intro again</a>
             </body></html>"##,
        );
        let links = extract_links(&html, &base);
        let got: Vec<&str> = links.iter().map(|u| u.as_str()).collect();
        assert_eq!(
            got,
            vec![
                "https://example.com/docs/intro",
                "https://example.com/docs/guide.html",
                "https://example.com/api",
            ]
        );
    }

    #[test]
    fn test_excluded_extensions_case_insensitive() {
        assert!(is_excluded(
            &Url::parse("https://example.com/report.PDF").unwrap()
        ));
        assert!(is_excluded(
            &Url::parse("https://example.com/pic.jpeg?size=2").unwrap()
        ));
        assert!(!is_excluded(
            &Url::parse("https://example.com/page.html").unwrap()
        ));
        assert!(!is_excluded(&Url::parse("https://example.com/page").unwrap()));
    }

    #[tokio::test]
    async fn test_non_text_seed_rejected_before_any_fetch() {
        let crawler = WebCrawler::new(&crate::config::CrawlerConfig::default()).unwrap();
        assert!(crawler.crawl("https://example.com/report.pdf").await.is_err());
        assert!(crawler.crawl("ftp://example.com/").await.is_err());
        assert!(crawler.crawl("not a url").await.is_err());
    }

    #[test]
    fn test_normalize_strips_fragment() {
        let url = Url::parse("https://example.com/a#b").unwrap();
        assert_eq!(normalize(&url).as_str(), "https://example.com/a");
    }
}
