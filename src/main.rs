use anyhow::{anyhow, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use lecture_companion::store::records::{self, relations, LectureRow, Scope};
use lecture_companion::store::{Filter, RecordStore};
use lecture_companion::topics;
use lecture_companion::{
    create_model, AnswerGrader, ArtifactFetcher, Config, GenerativeModel, InMemoryStore,
    IngestRequest, InsightAggregator, LectureIngestor, MediaExtractor, QuestionGenerator,
    RestStore, SlideAligner, SlideMapping, TesseractExtractor, Transcript, UnitOutcome,
    WhisperTranscriber,
};

fn cli() -> Command {
    Command::new("lecture-companion")
        .version("0.1.0")
        .about("Slide-to-video alignment, timestamp-scoped question generation and grading")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .help("Configuration file to load")
                .global(true),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(
            Command::new("ingest")
                .about("Fetch, align and transcribe one lecture")
                .arg(
                    Arg::new("video")
                        .value_name("VIDEO")
                        .help("Lecture video path or URL")
                        .required(true),
                )
                .arg(
                    Arg::new("slides")
                        .value_name("SLIDES")
                        .help("Slide deck PDF path or URL")
                        .required(true),
                )
                .arg(
                    Arg::new("lecture-id")
                        .long("lecture-id")
                        .value_name("ID")
                        .help("Lecture row to attach artifacts to"),
                )
                .arg(
                    Arg::new("workspace")
                        .long("workspace")
                        .value_name("DIR")
                        .help("Workspace directory for this lecture"),
                )
                .arg(
                    Arg::new("interval")
                        .long("interval")
                        .value_name("SECONDS")
                        .help("Seconds between sampled frames"),
                ),
        )
        .subcommand(
            Command::new("align")
                .about("Extract and align only, writing the mapping artifact")
                .arg(
                    Arg::new("source")
                        .value_name("FRAMES_DIR|VIDEO")
                        .help("Directory of sampled frames, or a lecture video")
                        .required(true),
                )
                .arg(
                    Arg::new("slides")
                        .value_name("SLIDES")
                        .help("Slide deck PDF")
                        .required(true),
                )
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .value_name("PATH")
                        .help("Where to write the mapping artifact")
                        .default_value("slide_mapping.json"),
                ),
        )
        .subcommand(
            Command::new("generate")
                .about("Generate questions for a session at a lecture timestamp")
                .arg(
                    Arg::new("lecture-id")
                        .long("lecture-id")
                        .value_name("ID")
                        .required(true),
                )
                .arg(
                    Arg::new("session-id")
                        .long("session-id")
                        .value_name("ID")
                        .required(true),
                )
                .arg(
                    Arg::new("timestamp")
                        .long("timestamp")
                        .value_name("SECONDS")
                        .help("Lecture timestamp the questions should cover up to")
                        .required(true),
                )
                .arg(
                    Arg::new("count")
                        .long("count")
                        .value_name("N")
                        .help("Questions to generate"),
                )
                .arg(
                    Arg::new("workspace")
                        .long("workspace")
                        .value_name("DIR")
                        .help("Workspace holding the lecture's rendered slides"),
                ),
        )
        .subcommand(
            Command::new("grade-session")
                .about("Grade every stored answer in a session")
                .arg(
                    Arg::new("session-id")
                        .long("session-id")
                        .value_name("ID")
                        .required(true),
                ),
        )
        .subcommand(
            Command::new("aggregate")
                .about("Rebuild misconception clusters and the narrative summary")
                .arg(
                    Arg::new("scope")
                        .long("scope")
                        .value_name("session|homework")
                        .required(true),
                )
                .arg(
                    Arg::new("scope-id")
                        .long("scope-id")
                        .value_name("ID")
                        .required(true),
                ),
        )
        .subcommand(
            Command::new("extract-topics")
                .about("Extract a topic taxonomy from a syllabus")
                .arg(
                    Arg::new("class-id")
                        .long("class-id")
                        .value_name("ID")
                        .required(true),
                )
                .arg(
                    Arg::new("syllabus")
                        .value_name("SYLLABUS")
                        .help("Syllabus PDF or text file")
                        .required(true),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Inspect or scaffold configuration")
                .arg(
                    Arg::new("show")
                        .long("show")
                        .help("Print the effective configuration")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("generate")
                        .long("generate")
                        .value_name("PATH")
                        .help("Write a default configuration file"),
                ),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    let filter = if matches.get_flag("verbose") {
        "lecture_companion=debug,info"
    } else {
        "lecture_companion=info,warn"
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match matches.get_one::<String>("config") {
        Some(path) => Config::load_from_file(path)?,
        None => Config::load()?,
    };

    if !matches!(matches.subcommand(), Some(("config", _))) {
        config.validate()?;
    }

    match matches.subcommand() {
        Some(("ingest", sub)) => run_ingest(&config, sub).await,
        Some(("align", sub)) => run_align(&config, sub).await,
        Some(("generate", sub)) => run_generate(&config, sub).await,
        Some(("grade-session", sub)) => run_grade_session(&config, sub).await,
        Some(("aggregate", sub)) => run_aggregate(&config, sub).await,
        Some(("extract-topics", sub)) => run_extract_topics(&config, sub).await,
        Some(("config", sub)) => run_config(&config, sub),
        _ => unreachable!("subcommand is required"),
    }
}

async fn run_ingest(config: &Config, matches: &ArgMatches) -> Result<()> {
    let video = matches.get_one::<String>("video").unwrap().clone();
    let slides = matches.get_one::<String>("slides").unwrap().clone();
    let lecture_id = parse_opt::<i64>(matches, "lecture-id")?;

    let mut extraction = config.extraction.clone();
    if let Some(interval) = parse_opt::<f64>(matches, "interval")? {
        extraction.frame_interval_seconds = interval;
    }

    let workspace = match matches.get_one::<String>("workspace") {
        Some(dir) => PathBuf::from(dir),
        None => default_workspace(config, lecture_id, &video),
    };

    let ingestor = LectureIngestor::new(
        MediaExtractor::new(extraction.clone()),
        SlideAligner::new(config.aligner.clone()),
        Arc::new(ArtifactFetcher::new(config.fetch.clone())?),
        Arc::new(WhisperTranscriber::new(config.transcription.clone())?),
        Arc::new(TesseractExtractor::new(extraction.ocr_language.clone())),
        build_store(config)?,
    );

    let request = IngestRequest {
        video,
        slides,
        workspace,
        lecture_id,
    };
    let outcome = ingestor.ingest(&request).await?;

    info!("💾 Mapping artifact: {}", outcome.mapping_path.display());
    info!("💾 Transcript: {}", outcome.transcript_path.display());
    Ok(())
}

async fn run_align(config: &Config, matches: &ArgMatches) -> Result<()> {
    let source = PathBuf::from(matches.get_one::<String>("source").unwrap());
    let slides = PathBuf::from(matches.get_one::<String>("slides").unwrap());
    let output = PathBuf::from(matches.get_one::<String>("output").unwrap());

    let extractor = MediaExtractor::new(config.extraction.clone());
    let ocr = TesseractExtractor::new(config.extraction.ocr_language.clone());
    let scratch = tempfile::tempdir()?;

    let deck = extractor
        .extract_slide_deck(&slides, &scratch.path().join("slides"), &ocr)
        .await?;
    let frames = if source.is_dir() {
        extractor.frame_samples_from_dir(&source, &ocr).await?
    } else {
        extractor
            .extract_frame_samples(&source, &scratch.path().join("frames"), &ocr)
            .await?
    };

    let mapping = SlideAligner::new(config.aligner.clone()).align(&deck, &frames, &source);
    if !mapping.is_monotonic() {
        warn!("slide mapping is not monotonic; alignment output may be unreliable");
    }
    mapping.save(&output).await?;

    info!(
        "🎉 Placed {}/{} slides; artifact at {}",
        mapping.slide_timestamps.len(),
        mapping.total_slides,
        output.display()
    );
    Ok(())
}

async fn run_generate(config: &Config, matches: &ArgMatches) -> Result<()> {
    let lecture_id: i64 = parse_required(matches, "lecture-id")?;
    let session_id: i64 = parse_required(matches, "session-id")?;
    let timestamp: f64 = parse_required(matches, "timestamp")?;

    let store = build_store(config)?;
    let model = build_model(config)?;

    let lecture = fetch_lecture(store.as_ref(), lecture_id).await?;

    let mapping_value = lecture
        .slide_mapping
        .clone()
        .ok_or_else(|| anyhow!("lecture {lecture_id} has no slide mapping; run ingest first"))?;
    let mapping = SlideMapping::from_value(mapping_value)?;

    let transcript_value = lecture
        .transcript
        .clone()
        .ok_or_else(|| anyhow!("lecture {lecture_id} has no transcript; run ingest first"))?;
    let transcript: Transcript = serde_json::from_value(transcript_value)?;

    // Count precedence: flag, then the lecture row, then the config file
    let mut generation = config.generation.clone();
    if let Some(count) = parse_opt::<u32>(matches, "count")? {
        generation.question_count = count;
    } else if let Some(count) = lecture.num_questions {
        generation.question_count = count;
    }

    let workspace = match matches.get_one::<String>("workspace") {
        Some(dir) => PathBuf::from(dir),
        None => config.workspace.root.join(format!("lecture-{lecture_id}")),
    };
    let slide_images = slide_images_in(&workspace.join("slides"))?;

    let generator = QuestionGenerator::new(model, store, generation);
    let questions = generator
        .generate_for_session(
            session_id,
            lecture.class_id.unwrap_or(0),
            timestamp,
            &mapping,
            &transcript,
            &slide_images,
        )
        .await?;

    info!(
        "🎉 Generated {} questions for session {}",
        questions.len(),
        session_id
    );
    for question in &questions {
        println!("{}. {}", question.question_number, question.question);
    }
    Ok(())
}

async fn run_grade_session(config: &Config, matches: &ArgMatches) -> Result<()> {
    let session_id: i64 = parse_required(matches, "session-id")?;

    let grader = AnswerGrader::new(
        build_model(config)?,
        build_store(config)?,
        config.grading.clone(),
    );
    let report = grader.grade_session(session_id).await?;

    println!("{report}");
    for failure in report.failures() {
        if let UnitOutcome::Failed { unit, reason } = failure {
            eprintln!("{unit}: {reason}");
        }
    }
    Ok(())
}

async fn run_aggregate(config: &Config, matches: &ArgMatches) -> Result<()> {
    let scope = match matches.get_one::<String>("scope").unwrap().as_str() {
        "session" => Scope::Session,
        "homework" => Scope::Homework,
        other => return Err(anyhow!("scope must be 'session' or 'homework', got {other:?}")),
    };
    let scope_id: i64 = parse_required(matches, "scope-id")?;

    let aggregator = InsightAggregator::new(
        build_model(config)?,
        build_store(config)?,
        config.aggregation.clone(),
    );
    let outcome = aggregator.aggregate(scope, scope_id).await?;

    println!("{}", outcome.report);
    match outcome.narrative {
        Some(narrative) => println!("\n{narrative}"),
        None => println!("no insights to summarize"),
    }
    Ok(())
}

async fn run_extract_topics(config: &Config, matches: &ArgMatches) -> Result<()> {
    let class_id: i64 = parse_required(matches, "class-id")?;
    let syllabus = PathBuf::from(matches.get_one::<String>("syllabus").unwrap());

    let is_pdf = syllabus
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("pdf"));
    let text = if is_pdf {
        MediaExtractor::new(config.extraction.clone()).pdf_text(&syllabus)?
    } else {
        tokio::fs::read_to_string(&syllabus).await?
    };

    let store = build_store(config)?;
    let model = build_model(config)?;

    let titles = topics::extract_topics_from_syllabus(model.as_ref(), &text).await;
    let stored = topics::store_topics(store.as_ref(), class_id, &titles).await?;

    for topic in &stored {
        println!("{}: {}", topic.id, topic.title);
    }
    Ok(())
}

fn run_config(config: &Config, matches: &ArgMatches) -> Result<()> {
    if let Some(path) = matches.get_one::<String>("generate") {
        Config::default().save(path)?;
        return Ok(());
    }

    // --show is also the default action
    println!("{}", config.summary());
    Ok(())
}

fn build_store(config: &Config) -> Result<Arc<dyn RecordStore>> {
    if config.store.base_url.is_empty() {
        warn!("record store not configured; using in-memory store");
        return Ok(Arc::new(InMemoryStore::new()));
    }
    Ok(Arc::new(RestStore::new(&config.store)?))
}

fn build_model(config: &Config) -> Result<Arc<dyn GenerativeModel>> {
    Ok(Arc::from(create_model(&config.model)?))
}

async fn fetch_lecture(store: &dyn RecordStore, lecture_id: i64) -> Result<LectureRow> {
    let rows = store
        .select(relations::LECTURES, &[Filter::eq("id", lecture_id)])
        .await?;
    let row = rows
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("lecture {lecture_id} not found"))?;
    Ok(records::decode_row(relations::LECTURES, row)?)
}

/// Rendered slide images of one lecture, in page order
fn slide_images_in(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| anyhow!("cannot read slide image directory {}: {}", dir.display(), e))?;

    let mut images = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if name.starts_with("slide") && name.ends_with(".jpg") {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

fn default_workspace(config: &Config, lecture_id: Option<i64>, video: &str) -> PathBuf {
    let name = match lecture_id {
        Some(id) => format!("lecture-{id}"),
        None => Path::new(video)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "lecture".to_string()),
    };
    config.workspace.root.join(name)
}

fn parse_opt<T: std::str::FromStr>(matches: &ArgMatches, name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match matches.get_one::<String>(name) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow!("invalid --{name}: {e}")),
        None => Ok(None),
    }
}

fn parse_required<T: std::str::FromStr>(matches: &ArgMatches, name: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    parse_opt(matches, name)?.ok_or_else(|| anyhow!("--{name} is required"))
}
