use std::fmt::Display;
use std::path::Path;

use clap::{CommandFactory, Parser};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};
use zscript_lib::{DecompileOptions, Script, Symbol, SymbolFilter};

use crate::cli::{Cli, Input, TopLevel};

mod cli;

fn fail(msg: impl Display) -> ! {
    eprintln!("error: {msg}");
    std::process::exit(1);
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load(path: &Path) -> Script {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => fail(format!("failed to read {path:?}: {e}")),
    };
    match Script::parse(&bytes) {
        Ok(script) => script,
        Err(e) => fail(format!("failed to load {path:?}: {e}")),
    }
}

/// Loads the script and resolves `--symbol`, if given.
fn open(input: &Input) -> (Script, Option<u32>) {
    let script = load(&input.path);
    let index = input.symbol.as_deref().map(|name| match script.require_symbol(name) {
        Ok(sym) => sym.index,
        Err(e) => fail(e),
    });
    (script, index)
}

fn selected(script: &Script, index: Option<u32>) -> Option<&Symbol> {
    index.and_then(|i| script.symbol_by_index(i))
}

fn write_sources(script: &Script, out: &Path, options: &DecompileOptions) {
    if let Err(e) = std::fs::create_dir_all(out) {
        fail(format!("failed to create {out:?}: {e}"));
    }
    for file in zscript_lib::decompile_script(script, options) {
        let path = out.join(&file.name);
        if let Err(e) = std::fs::write(&path, file.text) {
            fail(format!("failed to write {path:?}: {e}"));
        }
        info!(path = %path.display(), "wrote");
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Some(TopLevel::Symbols {
            input,
            include,
            exclude,
            find,
        }) => {
            let (script, index) = open(&input);
            match selected(&script, index) {
                Some(sym) => print!("{}", zscript_lib::describe_symbol(&script, sym)),
                None => {
                    let filter = SymbolFilter {
                        include,
                        exclude,
                        search: find,
                    };
                    print!("{}", zscript_lib::list_symbols(&script, &filter));
                }
            }
        }
        Some(TopLevel::Disasm { input }) => {
            let (script, index) = open(&input);
            match selected(&script, index) {
                Some(sym) => match zscript_lib::disassemble(&script, sym) {
                    Ok(out) => print!("{out}"),
                    Err(e) => fail(e),
                },
                None => print!("{}", zscript_lib::disassemble_all(&script)),
            }
        }
        Some(TopLevel::Decompile {
            input,
            out,
            indent,
            body_only,
        }) => {
            let (script, index) = open(&input);
            let options = DecompileOptions {
                indent,
                declarations: !body_only,
                ..DecompileOptions::default()
            };
            match selected(&script, index) {
                Some(sym) => match zscript_lib::decompile_with_options(&script, sym, &options) {
                    Ok(text) => print!("{text}"),
                    Err(e) => fail(e),
                },
                None => write_sources(&script, &out, &options),
            }
        }
        Some(TopLevel::Usages { input }) => {
            let (script, index) = open(&input);
            let Some(sym) = selected(&script, index) else {
                fail("please name the symbol to search for with --symbol");
            };
            match zscript_lib::find_usages(&script, sym) {
                Ok(usages) => {
                    for usage in usages {
                        println!("{usage}");
                    }
                }
                Err(e) => fail(e),
            }
        }
        Some(TopLevel::Completion { shell }) => {
            let mut cmd = Cli::command();
            let bin_name = cmd.get_name().to_string();
            clap_complete::generate(shell, &mut cmd, bin_name, &mut std::io::stdout());
        }
        None => {
            if let Err(e) = Cli::command().print_help() {
                fail(e);
            }
        }
    }
}
