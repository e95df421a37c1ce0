// tests/parser_fixtures.rs
//
// Parser behaviour on realistic RSS 2.0, Atom and Google News documents,
// using the provider rules that ship in config/feeds.toml.

use tsla_newsfeed::config::FeedsFile;
use tsla_newsfeed::ingest::parser::parse_feed;
use tsla_newsfeed::ingest::rules::ProviderRules;
use tsla_newsfeed::ingest::types::SkipReason;

const RSS: &str = include_str!("fixtures/rss.xml");
const ATOM: &str = include_str!("fixtures/atom.xml");
const GOOGLE: &str = include_str!("fixtures/google_news.xml");

const RSS_URL: &str = "https://insideevs.com/rss/category/tesla/";
const ATOM_URL: &str = "https://www.reddit.com/r/TeslaMotors/.rss";
const GOOGLE_URL: &str = "https://news.google.com/rss/search?q=tesla&hl=en-US&gl=US&ceid=US:en";

fn shipped_rules() -> ProviderRules {
    let feeds = FeedsFile::embedded().expect("embedded feeds.toml");
    ProviderRules::compile(&feeds.rules).expect("compile rules")
}

#[test]
fn rss_fixture_items_in_document_order() {
    let out = parse_feed(RSS, RSS_URL, &shipped_rules());

    let titles: Vec<&str> = out.items.iter().map(|i| i.title.as_str()).collect();
    assert_eq!(
        titles,
        vec![
            "Tesla Model Y Tops European Sales Charts",
            "Cybertruck Deliveries Ramp In Texas",
            "Ford Announces New Mustang Trim",
            "Tesla Model Y Tops European Sales Charts (updated)",
            "Tesla Q3 Earnings Recap",
        ]
    );
    assert_eq!(out.skipped.len(), 1);
    assert!(matches!(
        &out.skipped[0],
        SkipReason::MissingLink { title } if title == "Tesla Powerwall Price Cut"
    ));

    let first = &out.items[0];
    assert_eq!(first.link, "https://insideevs.com/news/model-y-europe/");
    assert_eq!(first.pub_date_raw, "Tue, 02 Jan 2024 10:00:00 GMT");
    assert_eq!(first.author.as_deref(), Some("Jane Doe"));
    assert_eq!(first.source_label, "insideevs.com");
    assert_eq!(first.origin_feed_url, RSS_URL);
    // media:content outranks the inline <img>.
    assert_eq!(
        first.image_url.as_deref(),
        Some("https://cdn.insideevs.test/model-y.jpg")
    );
    assert!(first.description.contains("best-selling car in Europe"));
    assert!(!first.description.contains('<'));

    assert_eq!(
        out.items[1].image_url.as_deref(),
        Some("https://cdn.insideevs.test/cybertruck.jpg")
    );
    assert_eq!(out.items[2].image_url, None);
}

#[test]
fn atom_fixture_links_dates_and_authors() {
    let out = parse_feed(ATOM, ATOM_URL, &shipped_rules());
    assert_eq!(out.items.len(), 3);
    assert!(out.skipped.is_empty());

    let fsd = &out.items[0];
    assert_eq!(fsd.title, "Tesla FSD v12 rolls out to employees");
    assert_eq!(
        fsd.link,
        "https://www.reddit.com/r/TeslaMotors/comments/abc/fsd_v12/"
    );
    assert_eq!(fsd.pub_date_raw, "2024-01-02T08:00:00+00:00");
    assert_eq!(fsd.author.as_deref(), Some("/u/driver42"));
    assert_eq!(fsd.image_url.as_deref(), Some("https://i.redd.it/fsd.jpg"));
    assert_eq!(fsd.source_label, "reddit.com");
    assert!(fsd.description.starts_with("Early reports look good."));
}

#[test]
fn google_news_redirects_are_resolved_or_dropped() {
    let out = parse_feed(GOOGLE, GOOGLE_URL, &shipped_rules());

    assert_eq!(out.items.len(), 2);
    assert_eq!(out.skipped.len(), 1);
    assert!(matches!(
        &out.skipped[0],
        SkipReason::UnresolvedRedirect { title } if title.starts_with("Tesla opens new showroom")
    ));

    let reuters = &out.items[0];
    assert_eq!(
        reuters.link,
        "https://www.reuters.com/business/autos-transportation/tesla-deliveries-2024-01-02/"
    );
    assert_eq!(reuters.source_label, "Reuters");
    assert_eq!(reuters.title, "Tesla shares rise after delivery beat");

    let mw = &out.items[1];
    assert_eq!(mw.link, "https://www.marketwatch.com/story/tsla-targets");
    assert_eq!(mw.title, "Analysts revisit TSLA price targets");
    assert_eq!(mw.source_label, "MarketWatch");
}

#[test]
fn garbage_and_empty_bodies_yield_nothing() {
    let rules = shipped_rules();
    for body in ["", "not xml at all", "<html><body>Blocked</body></html>"] {
        let out = parse_feed(body, RSS_URL, &rules);
        assert!(out.items.is_empty(), "{body:?}");
    }
}
