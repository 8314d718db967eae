/// Smoke-test for the rendering strategies.
///
/// Launches headless Chromium twice (plain and stealth), renders
/// <https://example.com> with each, and checks the cleaned Markdown.
///
/// Run with:
///   cargo run -p quarry-client --example browser_smoke --features browser
use quarry_client::{BrowserStrategy, HtmdCleaner, StealthStrategy};
use quarry_core::{Cleaner, FetchStrategy, ScrapeOptions};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let url = "https://example.com";
    let options = ScrapeOptions {
        wait_for: Some("h1".into()),
        ..Default::default()
    };
    let cleaner = HtmdCleaner::new();

    let strategies: Vec<Box<dyn FetchStrategy>> = vec![
        Box::new(BrowserStrategy::new().await?),
        Box::new(StealthStrategy::new().await?),
    ];

    for strategy in &strategies {
        println!("Rendering {url} with {} …", strategy.kind());
        let raw = strategy.fetch(url, &options, None).await?;
        let cleaned = cleaner.clean(&raw.body, &raw.final_url, &options)?;

        assert!(
            cleaned.markdown.contains("Example Domain"),
            "Expected heading not found in cleaned Markdown"
        );
        println!(
            "OK: {} bytes of HTML, {} bytes of Markdown, title {:?}",
            raw.body.len(),
            cleaned.markdown.len(),
            cleaned.title
        );
    }
    Ok(())
}
