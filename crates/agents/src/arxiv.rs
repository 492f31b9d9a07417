//! arXiv catalog search over the public Atom API.

use std::time::Duration;

use {
    anyhow::bail,
    async_trait::async_trait,
    courier_config::CatalogConfig,
    reqwest::header::USER_AGENT,
    tracing::debug,
};

use crate::document::{Document, DocumentSearch};

pub struct ArxivSearch {
    client: reqwest::Client,
    base_url: String,
    user_agent: String,
    timeout: Duration,
}

impl ArxivSearch {
    pub fn new(config: &CatalogConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(client: reqwest::Client, config: &CatalogConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.clone(),
            user_agent: config.user_agent.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

#[async_trait]
impl DocumentSearch for ArxivSearch {
    async fn search(&self, query: &str, max_results: usize) -> anyhow::Result<Vec<Document>> {
        let query = query.trim();
        if query.is_empty() || max_results == 0 {
            return Ok(Vec::new());
        }

        let resp = self
            .client
            .get(&self.base_url)
            .timeout(self.timeout)
            .header(USER_AGENT, &self.user_agent)
            .query(&[
                ("search_query", format!("all:{query}")),
                ("start", "0".to_string()),
                ("max_results", max_results.to_string()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            bail!("arXiv returned HTTP {status}");
        }

        let body = resp.text().await?;
        let docs = parse_atom_feed(&body, max_results);
        debug!(query, results = docs.len(), "arXiv search complete");
        Ok(docs)
    }
}

// ── Atom parsing ────────────────────────────────────────────────────────────

/// Pull `<entry>` elements out of an Atom feed. Entries lacking an id or a
/// title are skipped.
fn parse_atom_feed(xml: &str, max_results: usize) -> Vec<Document> {
    let mut docs = Vec::new();
    let mut rest = xml;

    while docs.len() < max_results {
        let Some(entry) = next_element(&mut rest, "entry") else {
            break;
        };
        if let Some(doc) = parse_entry(entry) {
            docs.push(doc);
        }
    }

    docs
}

fn parse_entry(entry: &str) -> Option<Document> {
    let id = element_text(entry, "id")?;
    let title = collapse_whitespace(&element_text(entry, "title")?);
    if id.is_empty() || title.is_empty() {
        return None;
    }

    let mut authors = Vec::new();
    let mut rest = entry;
    while let Some(author) = next_element(&mut rest, "author") {
        if let Some(name) = element_text(author, "name") {
            authors.push(name);
        }
    }

    Some(Document {
        url: id.clone(),
        id,
        title,
        summary: element_text(entry, "summary").unwrap_or_default(),
        authors,
        published: element_text(entry, "published").unwrap_or_default(),
    })
}

/// Byte offset of the first `<tag>` or `<tag attr...>` in `s`.
fn find_open_tag(s: &str, tag: &str) -> Option<usize> {
    let needle = format!("<{tag}");
    let mut from = 0;
    while let Some(pos) = s[from..].find(&needle) {
        let at = from + pos;
        match s[at + needle.len()..].chars().next() {
            Some(c) if c == '>' || c.is_whitespace() => return Some(at),
            _ => from = at + needle.len(),
        }
    }
    None
}

/// Inner content of the next `tag` element in `rest`, advancing `rest`
/// past it.
fn next_element<'a>(rest: &mut &'a str, tag: &str) -> Option<&'a str> {
    let s: &'a str = *rest;
    let open = find_open_tag(s, tag)?;
    let content_start = open + s[open..].find('>')? + 1;
    let close = format!("</{tag}>");
    let content_len = s[content_start..].find(&close)?;
    *rest = &s[content_start + content_len + close.len()..];
    Some(&s[content_start..content_start + content_len])
}

/// Trimmed, entity-decoded text of the first `tag` element in `s`.
fn element_text(s: &str, tag: &str) -> Option<String> {
    let mut rest = s;
    let inner = next_element(&mut rest, tag)?;
    Some(decode_xml_entities(inner.trim()))
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn decode_xml_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, mockito::Matcher, rstest::rstest};

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <id>http://arxiv.org/api/feed</id>
  <title type="html">ArXiv Query</title>
  <entry>
    <id>http://arxiv.org/abs/1706.03762v7</id>
    <updated>2023-08-02T00:41:18Z</updated>
    <published>2017-06-12T17:57:34Z</published>
    <title>Attention Is All
      You Need</title>
    <summary>  The dominant sequence transduction models are based on complex
recurrent or convolutional neural networks &amp; attention.
    </summary>
    <author>
      <name>Ashish Vaswani</name>
    </author>
    <author>
      <name>Noam Shazeer</name>
    </author>
    <link href="http://arxiv.org/abs/1706.03762v7" rel="alternate" type="text/html"/>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2001.00001v1</id>
    <published>2020-01-01T00:00:00Z</published>
    <title>Second Paper</title>
    <summary>Short.</summary>
    <author><name>A. Person</name></author>
  </entry>
</feed>"#;

    fn config(base_url: String) -> CatalogConfig {
        CatalogConfig {
            base_url,
            user_agent: "courier-test".into(),
            timeout_secs: 5,
        }
    }

    #[test]
    fn parses_entries() {
        let docs = parse_atom_feed(FEED, 10);
        assert_eq!(docs.len(), 2);

        let first = &docs[0];
        assert_eq!(first.id, "http://arxiv.org/abs/1706.03762v7");
        assert_eq!(first.url, first.id);
        assert_eq!(first.title, "Attention Is All You Need");
        assert!(first.summary.starts_with("The dominant sequence"));
        assert!(first.summary.ends_with("neural networks & attention."));
        assert_eq!(first.authors, vec!["Ashish Vaswani", "Noam Shazeer"]);
        assert_eq!(first.published, "2017-06-12T17:57:34Z");
    }

    #[test]
    fn respects_max_results() {
        assert_eq!(parse_atom_feed(FEED, 1).len(), 1);
    }

    #[test]
    fn feed_title_is_not_an_entry() {
        let docs = parse_atom_feed(FEED, 10);
        assert!(docs.iter().all(|d| d.title != "ArXiv Query"));
    }

    #[test]
    fn entry_without_id_is_skipped() {
        let xml = "<feed><entry><title>No id</title></entry></feed>";
        assert!(parse_atom_feed(xml, 5).is_empty());
    }

    #[test]
    fn empty_feed_yields_nothing() {
        assert!(parse_atom_feed("<feed></feed>", 5).is_empty());
        assert!(parse_atom_feed("not xml at all", 5).is_empty());
    }

    #[rstest]
    #[case("<identity/><id>x</id>", "id", Some(11))]
    #[case("<title type=\"text\">", "title", Some(0))]
    #[case("<title\n>", "title", Some(0))]
    #[case("<titles>", "title", None)]
    #[case("", "entry", None)]
    fn open_tag_needs_boundary(#[case] xml: &str, #[case] tag: &str, #[case] expected: Option<usize>) {
        assert_eq!(find_open_tag(xml, tag), expected);
    }

    #[tokio::test]
    async fn search_sends_query_and_user_agent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/query")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("search_query".into(), "all:transformer".into()),
                Matcher::UrlEncoded("start".into(), "0".into()),
                Matcher::UrlEncoded("max_results".into(), "2".into()),
            ]))
            .match_header("user-agent", "courier-test")
            .with_status(200)
            .with_header("content-type", "application/atom+xml")
            .with_body(FEED)
            .create_async()
            .await;

        let search = ArxivSearch::new(&config(format!("{}/api/query", server.url())));
        let docs = search.search(" transformer ", 2).await.unwrap();

        mock.assert_async().await;
        assert_eq!(docs.len(), 2);
    }

    #[tokio::test]
    async fn blank_query_makes_no_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let search = ArxivSearch::new(&config(format!("{}/api/query", server.url())));
        assert!(search.search("   ", 3).await.unwrap().is_empty());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn http_error_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/query")
            .match_query(Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let search = ArxivSearch::new(&config(format!("{}/api/query", server.url())));
        let err = search.search("quantum", 3).await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }
}
