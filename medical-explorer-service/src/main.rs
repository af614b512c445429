use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{Level, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use medical_explorer_service::{
    config::{DATASET_CONFIGS, ExplorerConfig},
    corpus,
    reasoning::RigReasoningEngine,
    stages::RetrievalConfig,
    vector_store::{StoreLoad, VectorStore},
    workflow,
};

const EXAMPLE_QUERIES: &[&str] = &[
    "Find patients with chest pain and abnormal cardiac findings",
    "Show me cases of pneumonia with imaging confirmation",
    "Patients with elevated troponin levels and cardiac history",
    "Find brain tumor cases with MRI imaging",
    "Patients with genetic mutations and cancer history",
];

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if std::env::var("OPENROUTER_API_KEY").is_err() {
        eprintln!("Error: OPENROUTER_API_KEY environment variable is required");
        std::process::exit(1);
    }

    let config = ExplorerConfig::from_env();

    let store = match VectorStore::load(&config.store_path)? {
        StoreLoad::Loaded(store) => {
            info!(documents = store.len(), "loaded existing vector store");
            store
        }
        StoreLoad::NotFound => {
            info!("no vector store found, building one");
            build_store(&config).await?
        }
        StoreLoad::Corrupt(reason) => {
            warn!("vector store unreadable ({reason}), rebuilding");
            build_store(&config).await?
        }
    };

    let reasoning = Arc::new(RigReasoningEngine::new(
        &config.model,
        config.reasoning_deadline,
    ));
    let retrieval = RetrievalConfig {
        k: config.retrieval_k,
        deadline: config.search_deadline,
        retry: config.retry,
    };
    let runner = workflow::create_runner(Arc::new(store), reasoning, retrieval)?;

    println!("Medical Data Exploration System");
    println!("{}", "=".repeat(50));
    println!("Example queries:");
    for query in EXAMPLE_QUERIES {
        println!("  - {query}");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        println!("\nEnter your medical query (or 'quit' to exit):");
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let query = line.trim();
        if matches!(query.to_lowercase().as_str(), "quit" | "exit" | "q") {
            break;
        }
        if query.is_empty() {
            continue;
        }

        println!("\nProcessing query...");
        match runner.run(query).await {
            Ok(response) => {
                println!("\n{}", "=".repeat(80));
                println!("RESULT:");
                println!("{}", "=".repeat(80));
                println!("{response}");
                println!("{}", "=".repeat(80));
            }
            Err(failure) => {
                eprintln!("Error processing query: {failure}");
            }
        }
    }

    Ok(())
}

async fn build_store(config: &ExplorerConfig) -> Result<VectorStore> {
    info!(path = %config.data_base_path.display(), "loading medical datasets");
    let documents = corpus::load_all_datasets(&config.data_base_path, DATASET_CONFIGS);
    if documents.is_empty() {
        warn!("no corpus documents found; searches will return nothing");
    }
    let store = VectorStore::build(documents).await?;
    store.save(&config.store_path)?;
    Ok(store)
}
