use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use pdf_qa_core::{
    is_fallback_answer, load_pdf_document, ApiKey, CharacterNgramEmbedder, CohereGenerator,
    Embedder, FsIndexStore, HttpEmbedder, PipelineState, QaOptions, QaPipeline, COHERE_BASE_URL,
    DEFAULT_COHERE_MODEL, DEFAULT_HTTP_EMBEDDING_DIMENSIONS, DEFAULT_HTTP_EMBEDDING_MODEL,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

type Pipeline = QaPipeline<Box<dyn Embedder>, CohereGenerator, FsIndexStore>;

#[derive(Parser)]
#[command(name = "pdf-qa", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding persisted indexes
    #[arg(long, env = "QA_INDEX_DIR", default_value = "./index_store")]
    index_dir: PathBuf,

    /// Maximum chunk length in characters
    #[arg(long, default_value = "1000")]
    chunk_size: usize,

    /// Characters shared by consecutive chunks
    #[arg(long, default_value = "200")]
    chunk_overlap: usize,

    /// Number of chunks passed to the generator
    #[arg(long, default_value = "3")]
    top_k: usize,

    /// Generation temperature
    #[arg(long, default_value = "0.1")]
    temperature: f32,

    /// Timeout for each embedding or generation request
    #[arg(long, default_value = "30")]
    timeout_secs: u64,

    /// Text-embeddings-inference base URL. Uses the local trigram embedder when unset.
    #[arg(long, env = "EMBEDDING_URL")]
    embedding_url: Option<String>,

    /// Model name served at the embedding URL
    #[arg(long, default_value = DEFAULT_HTTP_EMBEDDING_MODEL)]
    embedding_model: String,

    /// Vector length produced by the embedding model
    #[arg(long, default_value_t = DEFAULT_HTTP_EMBEDDING_DIMENSIONS)]
    embedding_dimensions: usize,

    /// Cohere API base URL
    #[arg(long, env = "COHERE_URL", default_value = COHERE_BASE_URL)]
    cohere_url: String,

    /// Cohere generation model
    #[arg(long, default_value = DEFAULT_COHERE_MODEL)]
    cohere_model: String,

    /// Cohere API key
    #[arg(long, env = "COHERE_API_KEY", hide_env_values = true)]
    cohere_api_key: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Extract, chunk, embed and persist a PDF.
    Index {
        /// PDF to index.
        #[arg(long)]
        pdf: PathBuf,
    },
    /// Answer questions about a PDF, indexing it first if needed.
    Ask {
        /// PDF to ask about.
        #[arg(long)]
        pdf: PathBuf,
        /// Question to answer. Repeat for several questions.
        #[arg(long = "question", required = true)]
        questions: Vec<String>,
        /// Print the retrieved chunks with their scores.
        #[arg(long, default_value_t = false)]
        explain: bool,
    },
}

impl Cli {
    fn options(&self) -> QaOptions {
        QaOptions {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            top_k: self.top_k,
            temperature: self.temperature,
            request_timeout: Duration::from_secs(self.timeout_secs),
        }
    }

    fn embedder(&self) -> anyhow::Result<Box<dyn Embedder>> {
        match &self.embedding_url {
            Some(url) => {
                let embedder = HttpEmbedder::new(url, Duration::from_secs(self.timeout_secs))
                    .context("configuring embedding client")?
                    .with_model(&self.embedding_model, self.embedding_dimensions);
                Ok(Box::new(embedder))
            }
            None => Ok(Box::new(CharacterNgramEmbedder::default())),
        }
    }

    fn pipeline(&self) -> anyhow::Result<Pipeline> {
        let generator = CohereGenerator::with_base_url(
            &self.cohere_url,
            Duration::from_secs(self.timeout_secs),
        )
        .context("configuring generation client")?
        .with_model(&self.cohere_model);

        let pipeline = QaPipeline::new(
            self.embedder()?,
            generator,
            FsIndexStore::new(&self.index_dir),
            self.options(),
        )
        .context("invalid pipeline options")?;
        Ok(pipeline)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let pipeline = cli.pipeline()?;
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        embedder = pipeline.embedder().model(),
        index_dir = %cli.index_dir.display(),
        "pdf-qa boot"
    );

    let state = PipelineState::new();

    match &cli.command {
        Command::Index { pdf } => {
            let document = load_pdf_document(pdf)
                .with_context(|| format!("reading {}", pdf.display()))?;
            let handle = pipeline
                .process_document(&state, &document)
                .await
                .with_context(|| format!("indexing {}", pdf.display()))?;

            println!(
                "indexed document_id={} chunks={} at {}",
                handle.document_id(),
                handle.chunk_count(),
                Utc::now().to_rfc3339()
            );
        }
        Command::Ask {
            pdf,
            questions,
            explain,
        } => {
            let Some(api_key) = cli.cohere_api_key.as_deref().map(ApiKey::new) else {
                bail!("a Cohere API key is required; pass --cohere-api-key or set COHERE_API_KEY");
            };

            let document = load_pdf_document(pdf)
                .with_context(|| format!("reading {}", pdf.display()))?;
            pipeline
                .process_document(&state, &document)
                .await
                .with_context(|| format!("indexing {}", pdf.display()))?;

            for question in questions {
                println!("question: {question}");

                if *explain {
                    let retrieved = pipeline
                        .retrieve(&state, question)
                        .await
                        .context("retrieving context")?;
                    for chunk in retrieved {
                        println!("  [chunk {}] score={:.4}", chunk.position, chunk.score);
                        println!("  {}", chunk.text.replace('\n', "\n  "));
                    }
                }

                let answer = pipeline
                    .ask(&state, question, &api_key)
                    .await
                    .with_context(|| format!("answering {question:?}"))?;
                if is_fallback_answer(&answer) {
                    warn!(question = %question, "answer not found in document");
                    println!("answer (not in document): {answer}");
                } else {
                    println!("answer: {answer}");
                }
            }
        }
    }

    Ok(())
}
