use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use docfind::extract::NODE_SEPARATOR;
use docfind::matcher::snippet::truncate_utf8_in_place;
use docfind::session::protocol::encode_event;
use docfind::{
    CancellationToken, ExtractionCache, FinderConfig, FinderError, FormatKind, Governor,
    Orchestrator, QueryDefaults, QuerySession, SearchContext, SearchEvent,
};

/// Command-line interface.
#[derive(Parser, Debug)]
#[command(
    name = "docfind",
    version,
    about = "Search file names and document contents under one or more roots"
)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Matcher worker threads (defaults to DOCFIND_WORKERS or the CPU count)
    #[arg(long, global = true)]
    workers: Option<usize>,

    /// Runes of context on each side of a match [default: 30]
    #[arg(long, global = true)]
    context: Option<usize>,

    /// Snippets collected per term [default: 3]
    #[arg(long, global = true)]
    max_snippets: Option<usize>,

    /// Extraction cache directory (defaults to the platform cache dir)
    #[arg(long, global = true, env = "DOCFIND_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Read documents directly, bypassing the extraction cache
    #[arg(long, global = true, default_value_t = false)]
    no_cache: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one query over every root and print the matches
    Search {
        /// Directory to search (repeatable)
        #[arg(long = "root", short = 'r', required = true)]
        roots: Vec<PathBuf>,

        /// Search term; every term must match (up to three)
        #[arg(long = "query", short = 'q', required = true)]
        terms: Vec<String>,

        /// Sort results by path instead of printing them as they arrive
        #[arg(long, default_value_t = false)]
        sort: bool,

        /// Print JSON event records instead of tab-separated lines
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Serve one root over line-delimited JSON on stdin/stdout
    Serve {
        #[arg(long = "root", short = 'r')]
        root: PathBuf,
    },
    /// Print the extracted text of a document
    Extract {
        file: PathBuf,

        /// Maximum bytes of text to print (0 = unlimited). Cached text is
        /// capped at DOCFIND_CACHE_MAX_TEXT_BYTES; use --no-cache for more
        #[arg(long, default_value_t = 0)]
        max_bytes: usize,
    },
}

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(FinderError::InvalidInput(message)) | Err(FinderError::InvalidQuery(message)) => {
            eprintln!("docfind: {message}");
            ExitCode::from(2)
        }
        Err(error) => {
            eprintln!("docfind: {error}");
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> docfind::Result<()> {
    let config = FinderConfig::from_env().with_workers(cli.common.workers.unwrap_or(0));
    let governor = Governor::shared();
    let defaults = QueryDefaults {
        context_len: cli.common.context.unwrap_or(config.context_len),
        max_snippets: cli.common.max_snippets.unwrap_or(config.max_snippets),
    };

    match cli.command {
        Commands::Search {
            roots,
            terms,
            sort,
            json,
        } => {
            let context = Arc::new(search_context(&cli.common, config, governor.clone()));
            run_search(roots, terms, defaults, sort, json, context, governor)
        }
        Commands::Serve { root } => {
            let context = Arc::new(search_context(&cli.common, config, governor.clone()));
            let (session, events) = QuerySession::new(root, context, governor);
            let stdin = io::stdin().lock();
            docfind::session::serve(stdin, io::stdout(), session, events, defaults)
        }
        Commands::Extract { file, max_bytes } => {
            let kind = FormatKind::from_path(&file).ok_or_else(|| {
                FinderError::InvalidInput(format!("unsupported file type: {}", file.display()))
            })?;
            let context = search_context(&cli.common, config, governor);
            let token = CancellationToken::noop();
            let mut text = match &context.cache {
                Some(cache) if kind.is_cacheable() => cache.get_or_extract(&file, |path| {
                    context
                        .extractors
                        .extract_text(path, kind, cache.max_text_bytes(), &token)
                })?,
                _ => context.extractors.extract_text(&file, kind, 0, &token)?,
            };
            truncate_utf8_in_place(&mut text, max_bytes);
            let mut stdout = io::stdout().lock();
            writeln!(stdout, "{}", text.replace(NODE_SEPARATOR, "\n"))?;
            Ok(())
        }
    }
}

fn search_context(common: &CommonArgs, config: FinderConfig, governor: Arc<Governor>) -> SearchContext {
    let context = SearchContext::new(config, governor);
    if common.no_cache {
        return context;
    }
    let cache_max = context.config().cache_max_text_bytes as usize;
    match common
        .cache_dir
        .clone()
        .or_else(|| dirs::cache_dir().map(|dir| dir.join("docfind")))
    {
        Some(dir) => context.with_cache(ExtractionCache::new(dir, cache_max)),
        None => {
            log::warn!("no cache directory available; reading documents directly");
            context
        }
    }
}

fn run_search(
    roots: Vec<PathBuf>,
    terms: Vec<String>,
    defaults: QueryDefaults,
    sort: bool,
    json: bool,
    context: Arc<SearchContext>,
    governor: Arc<Governor>,
) -> docfind::Result<()> {
    let mut orchestrator = Orchestrator::new(roots, context, governor)?;
    let mut stdout = BufWriter::new(io::stdout().lock());

    if sort {
        let results =
            orchestrator.run_to_completion(&terms, defaults.context_len, defaults.max_snippets, true)?;
        for (index, result) in results.into_iter().enumerate() {
            print_event(&mut stdout, index + 1, &SearchEvent::Result(result), json)?;
        }
        stdout.flush()?;
        return Ok(());
    }

    orchestrator.submit(&terms, defaults.context_len, defaults.max_snippets)?;
    let mut count = 0;
    while !orchestrator.is_finished() {
        let Some(event) = orchestrator.recv() else {
            break;
        };
        if matches!(event, SearchEvent::Result(_)) {
            count += 1;
        }
        print_event(&mut stdout, count, &event, json)?;
        stdout.flush()?;
    }
    Ok(())
}

fn print_event<W: Write>(out: &mut W, index: usize, event: &SearchEvent, json: bool) -> docfind::Result<()> {
    if json {
        writeln!(out, "{}", encode_event(event)?)?;
        return Ok(());
    }
    match event {
        SearchEvent::Result(result) => {
            let snippets: Vec<String> = result.snippets.iter().map(ToString::to_string).collect();
            writeln!(out, "{}\t{}\t{}", index, result.path.display(), snippets.join(" | "))?;
        }
        SearchEvent::Status { message, .. } => log::info!("{message}"),
        SearchEvent::Done { .. } => {}
    }
    Ok(())
}
