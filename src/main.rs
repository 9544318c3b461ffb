use anyhow::{Context, Result, bail};
use clap::Parser;
use std::path::Path;
use subgen::cli::{Cli, Commands};
use subgen::config::{Config, PrivateConfig};
use subgen::project::Project;
use subgen::report;
use subgen::worker::{DelimitedTextImport, PipelineContext, run_pipeline};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(Config::default_path);

    match cli.command {
        Commands::InitConfig { force } => {
            if config_path.exists() && !force {
                bail!(
                    "'{}' already exists (use --force to overwrite)",
                    config_path.display()
                );
            }
            Config::write_default(&config_path)?;
            eprintln!("wrote {}", config_path.display());
            Ok(())
        }
        Commands::Run { files, verbose } => {
            let config = Config::load(&config_path)
                .with_context(|| format!("loading '{}'", config_path.display()))?;
            config.validate()?;
            let private = PrivateConfig::load_for(&config_path)?;
            run_files(&config, &private, &files, verbose)
        }
    }
}

/// One pipeline pass per file. A file aborted by a broken invariant does
/// not stop the remaining files.
fn run_files(
    config: &Config,
    private: &PrivateConfig,
    files: &[std::path::PathBuf],
    verbose: bool,
) -> Result<()> {
    let mut errors: Vec<String> = Vec::new();
    let mut todos: Vec<String> = Vec::new();
    let mut projects: Vec<Project> = Vec::new();

    for file in files {
        let path = Project::path_for(file);
        let label = path.display().to_string();
        report::file_header(&label);

        let project = match Project::load_or_create(&path) {
            Ok(project) => project,
            Err(e) => {
                report::stage_failed(&label, &e.to_string());
                errors.push(format!("[{label}] {e}"));
                continue;
            }
        };
        let mut ctx = PipelineContext::new(project, private.api_keys.clone());
        if verbose {
            ctx.verbose_dir = Some(verbose_dir(&path));
        }

        if let Err(e) = run_pipeline(config, &mut ctx, &DelimitedTextImport) {
            report::stage_failed(&ctx.label(), &e.to_string());
            errors.push(format!("[{}] {e}", ctx.label()));
        }
        errors.append(&mut ctx.errors);
        todos.append(&mut ctx.todos);
        projects.push(ctx.project);
    }

    report::run_report(&errors, &todos, &projects.iter().collect::<Vec<_>>());
    if errors.is_empty() {
        Ok(())
    } else {
        bail!("{} error(s), see report above", errors.len());
    }
}

fn verbose_dir(project_path: &Path) -> std::path::PathBuf {
    let stem = project_path
        .file_stem()
        .unwrap_or_default()
        .to_string_lossy();
    project_path.with_file_name(format!("{stem}_verbose"))
}
