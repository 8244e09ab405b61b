use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use nz_core::pretty::{class_to_sexpr, module_to_sexpr};
use nz_core::{Compiler, CoreError, FsSources, ModulePath, Value};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Command-line driver for the nz compiler.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[arg(long, value_name = "DIR", default_value = ".", help = "Directory module paths are relative to")]
    root: PathBuf,

    #[arg(short, long, help = "Log pipeline progress (overridden by RUST_LOG)")]
    verbose: bool,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Print the tokens of one module
    Lex { path: String },
    /// Print the syntax tree of one module
    Parse { path: String },
    /// Resolve and type-check a module and its imports
    Check { path: String },
    /// Compile to one .wasm file per class
    Build {
        path: Option<String>,

        #[arg(short, long, value_name = "DIR", default_value = "out")]
        output: PathBuf,

        #[arg(long, help = "Build every module under the root", conflicts_with = "path")]
        all: bool,
    },
    /// Compile a module and call one of its static methods
    Run {
        path: String,
        method: String,
        args: Vec<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose { LevelFilter::DEBUG } else { LevelFilter::WARN };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::builder().with_default_directive(level.into()).from_env_lossy())
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

/// `shapes/point.nz` and `shapes/point` both name module `shapes/point`.
fn module_path(text: &str) -> ModulePath {
    ModulePath::parse(text.strip_suffix(".nz").unwrap_or(text))
}

fn execute(cli: Cli) -> Result<()> {
    let sources = FsSources::new(&cli.root);
    let mut compiler = Compiler::new(sources).context("failed to start the class loader")?;

    match cli.action {
        Action::Lex { path } => {
            let tokens = compiler.lex(&module_path(&path)).map_err(|err| report(&compiler, err))?;
            for lexed in tokens {
                println!("{}\t{}", lexed.loc, lexed.token);
            }
        }
        Action::Parse { path } => {
            let module = compiler.parse(&module_path(&path)).map_err(|err| report(&compiler, err))?;
            println!("{}", module_to_sexpr(&module));
        }
        Action::Check { path } => {
            compile(&mut compiler, &module_path(&path))?;
            for module in compiler.modules() {
                println!("{}", class_to_sexpr(compiler.classes(), compiler.classes().get(module.class)));
            }
        }
        Action::Build { path, output, all } => {
            let targets = match (path, all) {
                (_, true) => {
                    let sources = compiler.sources();
                    sources
                        .discover()
                        .with_context(|| format!("failed to scan {}", sources.root().display()))?
                }
                (Some(path), false) => vec![module_path(&path)],
                (None, false) => bail!("give a module path or --all"),
            };
            for target in &targets {
                compile(&mut compiler, target)?;
            }
            for module in compiler.modules() {
                let file = wasm_file(&output, &module.origin.logical);
                write_output(&file, &module.artifact.wasm)?;
                println!("wrote {}", file.display());
            }
        }
        Action::Run { path, method, args } => {
            let logical = module_path(&path);
            let artifact = &compile(&mut compiler, &logical)?.artifact;
            let Some(info) = artifact.method(&method) else {
                bail!("{logical} has no method {method}");
            };
            if !info.is_static {
                bail!("{logical}.{method} is an instance method; only static methods can be run");
            }
            if info.params.len() != args.len() {
                bail!("{method} takes {} arguments, but {} were given", info.params.len(), args.len());
            }
            let values = info
                .params
                .iter()
                .zip(&args)
                .map(|(ty, text)| Value::parse(*ty, text).ok_or_else(|| anyhow!("`{text}` is not a valid {ty}")))
                .collect::<Result<Vec<_>>>()?;
            let result = compiler
                .invoke(&logical, &method, &values)
                .map_err(|err| report(&compiler, err))?;
            println!("{result}");
        }
    }
    Ok(())
}

fn compile<'a>(compiler: &'a mut Compiler<FsSources>, logical: &ModulePath) -> Result<&'a nz_core::CompiledModule> {
    if let Err(err) = compiler.compile(logical) {
        return Err(report(compiler, err));
    }
    compiler
        .module(logical)
        .ok_or_else(|| anyhow!("{logical} was not compiled"))
}

fn report(compiler: &Compiler<FsSources>, err: CoreError) -> anyhow::Error {
    anyhow!(compiler.render_error(&err))
}

fn wasm_file(output: &Path, logical: &ModulePath) -> PathBuf {
    let mut file = output.to_path_buf();
    for part in logical.parts() {
        file.push(part.as_str());
    }
    file.set_extension("wasm");
    file
}

fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| format!("failed to create directory {parent:?}"))?;
        }
    }
    fs::write(path, bytes).with_context(|| format!("failed to write output file {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_cmd::Command;
    use predicates::prelude::*;
    use tempfile::{TempDir, tempdir};

    fn project(files: &[(&str, &str)]) -> TempDir {
        let dir = tempdir().expect("tempdir");
        for (path, text) in files {
            let file = dir.path().join(path);
            if let Some(parent) = file.parent() {
                fs::create_dir_all(parent).expect("create dirs");
            }
            fs::write(file, text).expect("write source");
        }
        dir
    }

    fn nz(root: &Path) -> Command {
        let mut command = Command::cargo_bin("nz").expect("binary exists");
        command.arg("--root").arg(root);
        command
    }

    #[test]
    fn runs_a_static_method() {
        let dir = project(&[("calc.nz", "fun Int x(String s)\n\t1 + Int.parse s\n")]);
        nz(dir.path())
            .args(["run", "calc.nz", "x", "123"])
            .assert()
            .success()
            .stdout(predicate::str::contains("124"));
    }

    #[test]
    fn builds_one_file_per_class() {
        let dir = project(&[
            ("app/main.nz", "import\n\t.util\nfun Int x()\n\tutil.one"),
            ("app/util.nz", "fun Int one()\n\t1\n"),
        ]);
        let out = dir.path().join("out");
        // `util.one` can't be called through a lowercase class name.
        nz(dir.path())
            .args(["build", "app", "-o"])
            .arg(&out)
            .assert()
            .failure()
            .stderr(predicate::str::contains("Error at app 4:2-"));

        fs::write(dir.path().join("app/main.nz"), "import\n\t.Util\nfun Int x()\n\tUtil.one").expect("rewrite");
        fs::rename(dir.path().join("app/util.nz"), dir.path().join("app/Util.nz")).expect("rename");
        nz(dir.path())
            .args(["build", "app", "-o"])
            .arg(&out)
            .assert()
            .success();
        assert!(out.join("app/Util.wasm").exists());
        assert!(out.join("app.wasm").exists());
    }

    #[test]
    fn builds_everything_under_the_root() {
        let dir = project(&[
            ("a.nz", "fun Int one()\n\t1\n"),
            ("shapes/main.nz", "fun Float half(Float x)\n\tx / 2.0\n"),
        ]);
        let out = dir.path().join("out");
        nz(dir.path())
            .args(["build", "--all", "-o"])
            .arg(&out)
            .assert()
            .success()
            .stdout(predicate::str::contains("wrote"));
        assert!(out.join("a.wasm").exists());
        assert!(out.join("shapes.wasm").exists());
    }

    #[test]
    fn reports_cycles_with_location() {
        let dir = project(&[
            ("a.nz", "import\n\t.b\nfun Int x()\n\t1\n"),
            ("b.nz", "import\n\t.a\nfun Int x()\n\t1\n"),
        ]);
        nz(dir.path())
            .args(["check", "a"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Error at b 2:2-2:4: circular dependency on module a"));
    }

    #[test]
    fn checks_and_prints_classes() {
        let dir = project(&[("x.nz", "slots\n\tval Int a\n\nfun Int x(Int y)\n\ty\n")]);
        nz(dir.path())
            .args(["check", "x"])
            .assert()
            .success()
            .stdout(predicate::str::contains("(class x x (val Int a) (fun Int x ((Int y)) (param y Int)))"));
    }

    #[test]
    fn lexes_and_parses() {
        let dir = project(&[("x.nz", "fun Int x(Int y)\n\ty + y\n")]);
        nz(dir.path())
            .args(["lex", "x"])
            .assert()
            .success()
            .stdout(predicate::str::starts_with("0..3\tfun"));
        nz(dir.path())
            .args(["parse", "x"])
            .assert()
            .success()
            .stdout(predicate::str::contains("(fun Int x ((Int y)) (+ y y))"));
    }

    #[test]
    fn rejects_bad_arguments() {
        let dir = project(&[("x.nz", "fun Int x(Int y)\n\ty\n")]);
        nz(dir.path())
            .args(["run", "x", "x", "nope"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("`nope` is not a valid Int"));
        nz(dir.path())
            .args(["run", "missing", "x"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("can't find module"));
    }

    #[test]
    fn strips_the_source_extension() {
        assert_eq!(module_path("shapes/point.nz"), ModulePath::parse("shapes/point"));
        assert_eq!(module_path("shapes"), ModulePath::parse("shapes"));
        assert_eq!(wasm_file(Path::new("out"), &ModulePath::parse("a/b")), PathBuf::from("out/a/b.wasm"));
    }
}
