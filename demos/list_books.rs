//! Lists books against a live database.
//!
//! Run from repo root: `cargo run --example list_books -- "le guin"`
//! `DATABASE_URL` and `SCHEMA_PATH` are read from the environment or `.env`.

use schema_crud::filter::Operator;
use schema_crud::query::{IncludeInput, PaginationInput, SortInput};
use schema_crud::{load_from_path, AppState, EngineSettings, Filter, HandlerFactory, HandlerOptions, ListRequest, PgStore};
use serde_json::json;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("schema_crud=info")),
        )
        .init();

    let mut settings = EngineSettings::from_env();
    if std::env::var("SCHEMA_PATH").is_err() {
        settings.schema_path = "demos/schema.json".into();
    }
    let registry = load_from_path(&settings.schema_path).await?;
    let store = PgStore::connect(&settings).await?;
    let state = AppState::new(Arc::new(store), registry, settings);

    let factory = HandlerFactory::new(state);
    let books = factory.entity(
        "Book",
        HandlerOptions {
            unique_fields: vec!["isbn".into()],
            ..Default::default()
        },
    )?;
    let authors = factory.entity(
        "Author",
        HandlerOptions {
            include: vec![IncludeInput::model("Book")],
            ..Default::default()
        },
    )?;

    let needle = std::env::args().nth(1).unwrap_or_default();
    let request = ListRequest {
        filters: vec![Filter::and(vec![
            Filter::condition("is_deleted", Operator::Eq, json!(false)),
            Filter::condition("title", Operator::Like, json!(needle)),
        ])],
        pagination: Some(PaginationInput::new(1, 10)),
        sort: Some(SortInput::Pairs(vec![("year".into(), json!("desc"))])),
    };
    let reply = books.list(request).await?;
    println!("{}", serde_json::to_string_pretty(&reply.to_json())?);

    let reply = authors.list(ListRequest::default()).await?;
    tracing::info!(status = %reply.status, "authors listed");
    println!("{}", serde_json::to_string_pretty(&reply.to_json())?);
    Ok(())
}
