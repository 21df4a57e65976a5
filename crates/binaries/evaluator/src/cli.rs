use clap::{Args, Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Result, bail};
use language_model::MemoryPolicy;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "cabin-eval", version, long_about = None)]
#[command(about = "Batch evaluation of cabin images and translations with a multimodal chat model")]
pub struct Cli {
    /// Settings file layered over the built-in defaults
    #[arg(long, global = true, env = "CABIN_EVAL_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Evaluate every record on its own, a chunk at a time
    Evaluate(RunArgs),
    /// Evaluate records as successive turns of one conversation per input file
    Converse(ConverseArgs),
    /// Sort entities and fill annotation-tool documents from parsed answers
    Map(MapArgs),
    /// Majority-vote repeated evaluations of the same record
    Merge(MergeArgs),
    /// Score parsed answers against reference annotations, label by label
    Compare(CompareArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Folder searched recursively for input files, or a single input file
    #[arg(short, long)]
    pub input: PathBuf,

    /// Folder the evaluated files are written to
    #[arg(short, long)]
    pub output: PathBuf,

    /// API key for the chat endpoint
    #[arg(short = 'k', long)]
    pub api_key: Option<String>,

    /// Base URL of the OpenAI-compatible endpoint
    #[arg(short = 'u', long)]
    pub base_url: Option<String>,

    #[arg(short, long)]
    pub model: Option<String>,

    /// Records per chunk
    #[arg(short = 'b', long)]
    pub chunk_size: Option<usize>,

    /// Seconds to wait between chunks
    #[arg(short, long)]
    pub delay: Option<f64>,

    /// Built-in prompt template: cabin, translation or scene
    #[arg(long, conflicts_with = "template_file")]
    pub template: Option<String>,

    /// Prompt template read from a file
    #[arg(long)]
    pub template_file: Option<PathBuf>,

    /// Built-in system prompt: multimodal, cabin or none
    #[arg(long)]
    pub system: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ConverseArgs {
    #[command(flatten)]
    pub run: RunArgs,

    #[arg(long, value_enum)]
    pub policy: Option<PolicyArg>,

    /// Turn count for sliding-window and freeze-after
    #[arg(long)]
    pub turns: Option<usize>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyArg {
    Unbounded,
    SlidingWindow,
    FreezeAfter,
}

impl ConverseArgs {
    /// The memory policy after applying `--policy` and `--turns` to the configured one.
    pub fn memory_policy(&self, configured: MemoryPolicy) -> Result<MemoryPolicy> {
        let configured_turns = match configured {
            MemoryPolicy::Unbounded => None,
            MemoryPolicy::SlidingWindow { turns } | MemoryPolicy::FreezeAfter { turns } => {
                Some(turns)
            }
        };
        let kind = self.policy.unwrap_or(match configured {
            MemoryPolicy::Unbounded => PolicyArg::Unbounded,
            MemoryPolicy::SlidingWindow { .. } => PolicyArg::SlidingWindow,
            MemoryPolicy::FreezeAfter { .. } => PolicyArg::FreezeAfter,
        });
        let turns = self.turns.or(configured_turns);
        Ok(match (kind, turns) {
            (PolicyArg::Unbounded, _) => MemoryPolicy::Unbounded,
            (_, None) => bail!("--turns is required for {kind:?}"),
            (PolicyArg::SlidingWindow, Some(0)) => {
                bail!("--turns must be at least 1 for a sliding window")
            }
            (PolicyArg::SlidingWindow, Some(turns)) => MemoryPolicy::SlidingWindow { turns },
            (PolicyArg::FreezeAfter, Some(turns)) => MemoryPolicy::FreezeAfter { turns },
        })
    }
}

#[derive(Args, Debug, Clone)]
pub struct MapArgs {
    /// Parsed answers: one JSON object, an array of them, or `merge` output
    #[arg(short, long)]
    pub input: PathBuf,

    /// Annotation-tool document used as the template for every answer
    #[arg(short, long)]
    pub template: PathBuf,

    #[arg(short, long)]
    pub output: PathBuf,

    /// JSON object replacing the default position table
    #[arg(long)]
    pub positions: Option<PathBuf>,

    /// JSON object replacing the default gender table
    #[arg(long)]
    pub genders: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct MergeArgs {
    /// Evaluated JSON Lines file with repeated records
    #[arg(short, long)]
    pub input: PathBuf,

    #[arg(short, long)]
    pub output: PathBuf,

    #[arg(long, default_value = "image_path")]
    pub group_by: String,

    /// Field holding the evaluation result, defaults to `batch.output_field`
    #[arg(long)]
    pub field: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct CompareArgs {
    /// Reference annotations exported from the annotation tool, in answer order
    #[arg(short, long)]
    pub reference: PathBuf,

    /// Parsed answers: one JSON object, an array of them, or `merge` output
    #[arg(short, long)]
    pub input: PathBuf,

    /// Where to write the report as JSON; it is always logged
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// JSON object replacing the default position table
    #[arg(long)]
    pub positions: Option<PathBuf>,

    /// JSON object replacing the default gender table
    #[arg(long)]
    pub genders: Option<PathBuf>,
}
