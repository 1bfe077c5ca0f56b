//! Article digest: scrape, summarize, and rank articles from a list of sources.
//!
//! This example demonstrates:
//! 1. Retrying a flaky scrape with exponential backoff
//! 2. Falling back to a default when a step fails
//! 3. Terminating a run early when there is nothing to do
//! 4. Watching step progress on the relay
//!
//! Run with `cargo run --example article_digest`.

use async_trait::async_trait;
use ayumi::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
struct Article {
    url: String,
    body: String,
}

#[derive(Debug)]
struct ArticleDigest {
    // Fails the first scrape of each run to show a retry
    scrapes: Arc<AtomicU32>,
}

#[async_trait]
impl Workflow for ArticleDigest {
    type Params = Vec<String>;
    type Output = Vec<(String, String)>;

    async fn run(
        &self,
        event: &WorkflowEvent<Vec<String>>,
        step: &WorkflowStep,
    ) -> Result<Self::Output, WorkflowError> {
        let sources = event.payload().clone();
        if sources.is_empty() {
            return Err(Termination::new("no sources configured").into());
        }

        let scrape = StepOptions::new()
            .with_retries(RetryPolicy::exponential(3, "1 second")?)
            .with_timeout_expr("30 seconds")?;
        let scrapes = self.scrapes.clone();
        let articles: Vec<Article> = step
            .run_with("scrape-contents", scrape, move |attempt| {
                let sources = sources.clone();
                let scrapes = scrapes.clone();
                async move {
                    if scrapes.fetch_add(1, Ordering::SeqCst) == 0 {
                        anyhow::bail!("connection reset on attempt {}", attempt.number());
                    }
                    Ok(sources
                        .into_iter()
                        .map(|url| Article {
                            body: format!("Lorem ipsum from {url}"),
                            url,
                        })
                        .collect())
                }
            })
            .await?;

        step.sleep("rate-limit", "1 second".parse::<StepDuration>()?).await;

        let mut digest = Vec::new();
        for article in articles {
            let summary = step
                .run(format!("summarize {}", article.url), {
                    let article = article.clone();
                    move |_| {
                        let article = article.clone();
                        async move {
                            if article.url.contains("paywall") {
                                anyhow::bail!("paywalled");
                            }
                            Ok(article.body.chars().take(24).collect::<String>())
                        }
                    }
                })
                .await
                .unwrap_or_else(|_| "(summary unavailable)".to_string());
            digest.push((article.url, summary));
        }

        Ok(digest)
    }
}

#[tokio::main]
async fn main() -> Result<(), WorkflowError> {
    tracing_subscriber::fmt::init();

    let engine = WorkflowEngine::new(EngineConfig::default().with_metrics_retention(50))?;
    let mut progress = engine.subscribe("article-digest");
    let digest = engine.entrypoint(
        "article-digest",
        ArticleDigest {
            scrapes: Arc::new(AtomicU32::new(0)),
        },
    );

    tokio::spawn(async move {
        while let Some(event) = progress.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => println!("  relay: {json}"),
                Err(err) => println!("  relay: unserialisable event: {err}"),
            }
        }
    });

    let sources = vec![
        "https://example.com/rust-async".to_string(),
        "https://example.com/paywall/backoff".to_string(),
    ];
    let event =
        WorkflowEvent::new(EventId::generate(), sources).with_trigger(WorkflowTrigger::Manual);
    let event_id = event.id().clone();

    println!("Running digest...");
    for (url, summary) in digest.execute(event).await? {
        println!("  {url}: {summary}");
    }

    let empty =
        WorkflowEvent::new(EventId::generate(), Vec::new()).with_trigger(WorkflowTrigger::Cron);
    if let Err(err) = digest.execute(empty).await {
        println!("Second run stopped: {err}");
    }

    if let Some(run) = digest.event_metrics(event_id.as_str()) {
        println!("\nLedger for {}:", run.event_id());
        for record in run.steps() {
            println!(
                "  #{} {} [{}] attempts={} duration={:?}ms",
                record.index,
                record.name,
                record.status,
                record.attempts,
                record.duration_ms()
            );
        }
    }

    let stats = engine.metrics().stats("article-digest");
    println!(
        "\nStats: {} succeeded, {} failed, {} terminated",
        stats.succeeded, stats.failed, stats.terminated
    );

    Ok(())
}
