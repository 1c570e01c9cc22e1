//! On-page SEO analysis.

use anyhow::{Result, anyhow};
use scraper::{Html, Selector};
use std::time::Duration;

use super::checker::Checker;
use super::types::SeoReport;

pub const SEO_USER_AGENT: &str = "Mozilla/5.0 (compatible; Sitewatch SEO Analyzer/1.0)";

const TITLE_MAX: usize = 60;
const TITLE_MIN: usize = 30;
const META_DESCRIPTION_MAX: usize = 160;
const META_DESCRIPTION_MIN: usize = 70;

/// Element selectors used by the analysis, parsed once
struct Selectors {
    title: Selector,
    meta_description: Selector,
    h1: Selector,
    h2: Selector,
    img: Selector,
}

impl Selectors {
    fn new() -> Result<Self> {
        let parse =
            |css: &str| Selector::parse(css).map_err(|e| anyhow!("bad selector {css}: {e}"));
        Ok(Self {
            title: parse("title")?,
            meta_description: parse(r#"meta[name="description"]"#)?,
            h1: parse("h1")?,
            h2: parse("h2")?,
            img: parse("img")?,
        })
    }
}

/// Fetches a page and reports its SEO metadata
pub struct SeoAnalyzer {
    client: reqwest::Client,
    selectors: Selectors,
}

impl SeoAnalyzer {
    pub fn new(timeout_seconds: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .user_agent(SEO_USER_AGENT)
            .build()?;

        Ok(Self { client, selectors: Selectors::new()? })
    }

    /// Fetch the page body. Any final status outside 2xx, redirects included,
    /// is an error.
    async fn fetch(&self, target: &str) -> Result<String, String> {
        let response = self.client.get(target).send().await.map_err(request_failure)?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("Request error: {status}"));
        }

        response.text().await.map_err(request_failure)
    }

    /// Analyze an HTML document
    pub fn analyze_html(&self, body: &str) -> SeoReport {
        let document = Html::parse_document(body);
        let s = &self.selectors;

        let title = document
            .select(&s.title)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .unwrap_or_default();
        let meta_description = document
            .select(&s.meta_description)
            .next()
            .and_then(|el| el.value().attr("content"))
            .unwrap_or_default()
            .to_string();

        let h1_count = document.select(&s.h1).count();
        let h2_count = document.select(&s.h2).count();
        let (image_count, images_without_alt) =
            document.select(&s.img).fold((0, 0), |(total, missing), img| {
                let has_alt = img.value().attr("alt").is_some_and(|alt| !alt.trim().is_empty());
                (total + 1, if has_alt { missing } else { missing + 1 })
            });

        let title_length = title.chars().count();
        let meta_description_length = meta_description.chars().count();
        let issues =
            detect_issues(title_length, meta_description_length, h1_count, images_without_alt);

        SeoReport {
            title,
            title_length,
            meta_description,
            meta_description_length,
            h1_count,
            h2_count,
            image_count,
            images_without_alt,
            has_issues: !issues.is_empty(),
            issues,
            error: None,
        }
    }
}

#[async_trait::async_trait]
impl Checker for SeoAnalyzer {
    type Report = SeoReport;

    async fn check(&self, target: &str) -> SeoReport {
        match self.fetch(target).await {
            Ok(body) => self.analyze_html(&body),
            Err(message) => SeoReport::failure(message),
        }
    }
}

fn request_failure(e: reqwest::Error) -> String {
    if e.is_timeout() {
        "Request timeout".to_string()
    } else {
        format!("Request error: {e}")
    }
}

/// Findings in fixed order: title, meta description, H1, images.
///
/// Length checks within one field are exclusive, the first match wins.
pub fn detect_issues(
    title_length: usize,
    meta_description_length: usize,
    h1_count: usize,
    images_without_alt: usize,
) -> Vec<String> {
    let mut issues = Vec::new();

    if title_length == 0 {
        issues.push("No title tag found".to_string());
    } else if title_length > TITLE_MAX {
        issues.push(format!("Title too long (>{TITLE_MAX} chars)"));
    } else if title_length < TITLE_MIN {
        issues.push(format!("Title too short (<{TITLE_MIN} chars)"));
    }

    if meta_description_length == 0 {
        issues.push("No meta description found".to_string());
    } else if meta_description_length > META_DESCRIPTION_MAX {
        issues.push(format!("Meta description too long (>{META_DESCRIPTION_MAX} chars)"));
    } else if meta_description_length < META_DESCRIPTION_MIN {
        issues.push(format!("Meta description too short (<{META_DESCRIPTION_MIN} chars)"));
    }

    match h1_count {
        0 => issues.push("No H1 tag found".to_string()),
        1 => {}
        _ => issues.push("Multiple H1 tags found".to_string()),
    }

    if images_without_alt > 0 {
        issues.push(format!("{images_without_alt} images missing alt text"));
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn analyzer() -> SeoAnalyzer {
        SeoAnalyzer::new(5).unwrap()
    }

    fn page(title: &str, description: &str) -> String {
        format!(
            r#"<!DOCTYPE html><html><head><title>  {title}  </title>
            <meta name="description" content="{description}"></head>
            <body><h1>Main</h1><h2>One</h2><h2>Two</h2>
            <img src="a.png" alt="A"><img src="b.png" alt="B"></body></html>"#
        )
    }

    #[test]
    fn test_clean_page_has_no_issues() {
        let report = analyzer().analyze_html(&page(&"t".repeat(45), &"d".repeat(100)));

        assert_eq!(report.title_length, 45);
        assert_eq!(report.meta_description_length, 100);
        assert_eq!(report.h1_count, 1);
        assert_eq!(report.h2_count, 2);
        assert_eq!(report.image_count, 2);
        assert_eq!(report.images_without_alt, 0);
        assert!(report.issues.is_empty());
        assert!(!report.has_issues);
        assert!(report.error.is_none());
    }

    #[test]
    fn test_broken_page_reports_in_fixed_order() {
        let html = r#"<html><head></head><body>
            <h1>First</h1><h1>Second</h1>
            <img src="x.png"><img src="y.png" alt="described">
            </body></html>"#;
        let report = analyzer().analyze_html(html);

        assert_eq!(
            report.issues,
            vec![
                "No title tag found",
                "No meta description found",
                "Multiple H1 tags found",
                "1 images missing alt text",
            ]
        );
        assert!(report.has_issues);
        assert_eq!(report.title, "");
        assert_eq!(report.meta_description, "");
    }

    #[test]
    fn test_whitespace_alt_counts_as_missing() {
        let html = r#"<html><head><title>x</title></head><body>
            <h1>a</h1><img src="a" alt="   "><img src="b" alt=""><img src="c"></body></html>"#;
        let report = analyzer().analyze_html(html);
        assert_eq!(report.image_count, 3);
        assert_eq!(report.images_without_alt, 3);
        assert!(report.issues.contains(&"3 images missing alt text".to_string()));
    }

    #[test]
    fn test_length_checks_are_exclusive() {
        assert_eq!(detect_issues(61, 100, 1, 0), vec!["Title too long (>60 chars)"]);
        assert_eq!(detect_issues(29, 100, 1, 0), vec!["Title too short (<30 chars)"]);
        assert!(detect_issues(60, 160, 1, 0).is_empty());
        assert!(detect_issues(30, 70, 1, 0).is_empty());
        assert_eq!(
            detect_issues(45, 161, 0, 0),
            vec!["Meta description too long (>160 chars)", "No H1 tag found"]
        );
        assert_eq!(detect_issues(45, 69, 1, 0), vec!["Meta description too short (<70 chars)"]);
    }

    #[test]
    fn test_title_length_counts_characters() {
        let title = "é".repeat(40);
        let report = analyzer().analyze_html(&page(&title, &"d".repeat(100)));
        assert_eq!(report.title_length, 40);
        assert!(report.issues.is_empty());
    }

    #[tokio::test]
    async fn test_check_fetches_with_user_agent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("user-agent", SEO_USER_AGENT))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(page(&"t".repeat(45), &"d".repeat(100))),
            )
            .mount(&server)
            .await;

        let report = analyzer().check(&server.uri()).await;
        assert!(report.error.is_none());
        assert!(!report.has_issues);
    }

    #[tokio::test]
    async fn test_error_status_yields_failure_report() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let report = analyzer().check(&server.uri()).await;
        assert!(report.error.unwrap().starts_with("Request error"));
        assert!(report.issues.is_empty());
        assert!(!report.has_issues);
    }

    #[tokio::test]
    async fn test_non_success_status_is_not_analyzed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cached"))
            .respond_with(ResponseTemplate::new(304))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/choices"))
            .respond_with(ResponseTemplate::new(300).set_body_string("<html></html>"))
            .mount(&server)
            .await;

        for (route, status) in [("/cached", "304"), ("/choices", "300")] {
            let report = analyzer().check(&format!("{}{route}", server.uri())).await;
            let error = report.error.clone().unwrap();
            assert!(error.starts_with("Request error"), "{error}");
            assert!(error.contains(status), "{error}");
            assert!(report.issues.is_empty());
            assert!(!report.has_issues);
            assert_eq!(report.h1_count, 0);
        }
    }

    #[tokio::test]
    async fn test_timeout_yields_failure_report() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let report = SeoAnalyzer::new(1).unwrap().check(&server.uri()).await;
        assert_eq!(report, SeoReport::failure("Request timeout"));
    }
}
