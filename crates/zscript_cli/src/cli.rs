use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::{Styles, styling::{AnsiColor, Effects}}, crate_description, crate_version};
use clap_complete::Shell;

#[derive(Parser)]
#[command(name = "zscript",
    bin_name = "zscript",
    version = crate_version!(),
    about = crate_description!(),
    styles = Styles::styled()
        .header(AnsiColor::BrightGreen.on_default() | Effects::BOLD | Effects::UNDERLINE)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::BrightCyan.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Cyan.on_default()))]
pub struct Cli {
    /// Log debug output to stderr (overridden by RUST_LOG)
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<TopLevel>,
}

#[derive(Args)]
pub struct Input {
    /// Path to the compiled script (.DAT)
    pub path: PathBuf,

    /// Name of a symbol to inspect
    #[arg(short, long)]
    pub symbol: Option<String>,
}

#[derive(Subcommand)]
pub enum TopLevel {
    /// Lists all symbols, or details of the one passed with --symbol
    Symbols {
        #[command(flatten)]
        input: Input,

        /// Only show symbols with any of these flag or type codes (c r m e M g / v f i s C F P I)
        #[arg(short, long, default_value = "")]
        include: String,

        /// Hide symbols with any of these flag or type codes
        #[arg(short = 'x', long, default_value = "")]
        exclude: String,

        /// Only show symbols whose name contains this text
        #[arg(short = 'c', long, default_value = "")]
        find: String,
    },
    /// Prints the disassembly of one symbol, or of every symbol with a body
    Disasm {
        #[command(flatten)]
        input: Input,
    },
    /// Decompiles one symbol to stdout, or the whole script into source files
    Decompile {
        #[command(flatten)]
        input: Input,

        /// Directory for the reconstructed sources when no --symbol is given
        #[arg(short, long, default_value = ".")]
        out: PathBuf,

        /// Spaces of indentation per block level
        #[arg(long, default_value_t = 4)]
        indent: usize,

        /// Print only the body, without the declaration around it
        #[arg(long, default_value_t = false)]
        body_only: bool,
    },
    /// Prints every instruction that references the symbol passed with --symbol
    Usages {
        #[command(flatten)]
        input: Input,
    },
    /// Generate shell completion
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}
