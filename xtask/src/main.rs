use std::error::Error;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitCode};

use clap::{Parser, Subcommand, ValueEnum};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

type TaskResult = Result<(), Box<dyn Error>>;

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Task runner for the ZooKeeper snapshot backup workspace"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run CI checks
    Ci {
        #[arg(value_enum, default_value_t = CiJob::Check)]
        job: CiJob,
    },
    /// Build the backup Lambda and zip it as `bootstrap`
    ServerlessPackage {
        #[arg(long, default_value = "x86_64-unknown-linux-gnu")]
        target: String,
        #[arg(value_enum, long, default_value_t = BuildProfile::Release)]
        profile: BuildProfile,
        #[arg(long, env = "BACKUP_DIST_DIR", default_value = "infra/zk_backup/dist")]
        dist_dir: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum CiJob {
    /// rustfmt and clippy
    Lint,
    /// Unit and integration tests
    Test,
    /// Lint, then test
    Check,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BuildProfile {
    Debug,
    Release,
}

/// The single deployable: `zk_backup_lambda`'s `backup_lambda` binary.
struct LambdaArtifact<'a> {
    target: &'a str,
    profile: BuildProfile,
}

impl LambdaArtifact<'_> {
    const PACKAGE: &'static str = "zk_backup_lambda";
    const BIN: &'static str = "backup_lambda";
    const ZIP_NAME: &'static str = "backup.zip";

    fn build_args(&self) -> Vec<&str> {
        let mut args = vec![
            "build",
            "-p",
            Self::PACKAGE,
            "--bin",
            Self::BIN,
            "--no-default-features",
            "--target",
            self.target,
        ];
        if self.profile == BuildProfile::Release {
            args.push("--release");
        }
        args
    }

    fn binary_path(&self) -> PathBuf {
        let profile_dir = match self.profile {
            BuildProfile::Debug => "debug",
            BuildProfile::Release => "release",
        };
        let file_name = if self.target.contains("windows") {
            format!("{}.exe", Self::BIN)
        } else {
            Self::BIN.to_string()
        };
        Path::new("target")
            .join(self.target)
            .join(profile_dir)
            .join(file_name)
    }

    fn package(&self, dist_dir: &Path) -> Result<PathBuf, Box<dyn Error>> {
        let binary_path = self.binary_path();
        let binary = fs::read(&binary_path)
            .map_err(|error| format!("cannot read '{}': {error}", binary_path.display()))?;

        fs::create_dir_all(dist_dir)?;
        let zip_path = dist_dir.join(Self::ZIP_NAME);
        let mut zip = ZipWriter::new(File::create(&zip_path)?);
        zip.start_file(
            "bootstrap",
            FileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .unix_permissions(0o755),
        )?;
        zip.write_all(&binary)?;
        zip.finish()?;
        Ok(zip_path)
    }
}

fn cargo(label: &str, args: &[&str]) -> TaskResult {
    eprintln!("\n=== {label} ===\n+ cargo {}", args.join(" "));
    let status = Command::new("cargo").args(args).status()?;
    if status.success() {
        Ok(())
    } else {
        Err(format!("`cargo {}` failed with {status}", args.join(" ")).into())
    }
}

/// Fails early when rustup knows the target is missing; skipped without rustup.
fn check_target_installed(target: &str) -> TaskResult {
    let Ok(output) = Command::new("rustup")
        .args(["target", "list", "--installed"])
        .output()
    else {
        eprintln!("warning: rustup not found, skipping target check for `{target}`");
        return Ok(());
    };

    let installed = String::from_utf8_lossy(&output.stdout);
    if installed.lines().any(|line| line.trim() == target) {
        return Ok(());
    }
    Err(format!("rust target `{target}` is not installed; run `rustup target add {target}`").into())
}

fn run_ci(job: CiJob) -> TaskResult {
    if matches!(job, CiJob::Lint | CiJob::Check) {
        cargo("Check formatting", &["fmt", "--all", "--", "--check"])?;
        cargo(
            "Clippy",
            &["clippy", "--all-targets", "--all-features", "--", "-D", "warnings"],
        )?;
    }
    if matches!(job, CiJob::Test | CiJob::Check) {
        cargo("Test workspace", &["test", "--workspace"])?;
    }
    eprintln!("\nCI job passed.");
    Ok(())
}

fn serverless_package(target: &str, profile: BuildProfile, dist_dir: &Path) -> TaskResult {
    check_target_installed(target)?;
    let artifact = LambdaArtifact { target, profile };
    cargo("Build backup lambda", &artifact.build_args())?;
    let zip_path = artifact.package(dist_dir)?;
    eprintln!("\nPackaged artifact:\n- {}", zip_path.display());
    Ok(())
}

fn main() -> ExitCode {
    let result = match Cli::parse().command {
        Commands::Ci { job } => run_ci(job),
        Commands::ServerlessPackage {
            target,
            profile,
            dist_dir,
        } => serverless_package(&target, profile, &dist_dir),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}
