use anyhow::{bail, Context, Result};
use bima::config::{BuildConfig, ImageReference, ImportTarget, OutputKind, PackageParams};
use bima::constants::{DEFAULT_CONTAINERD_ADDRESS, DEFAULT_CONTAINERFILE, DEFAULT_NAMESPACE};
use bima::import::CtrImporter;
use bima::logging::init_logging;
use bima::oci::OciImage;
use bima::pipeline::{self, BuildOptions, BuildRequest, ExportOutcome};
use clap::{Args, Parser, Subcommand};
use std::env;
use std::path::{Path, PathBuf};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "bima", version, about = "Build OCI images for unikernels")]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Require an ARCH instruction instead of probing the unikernel binary
    #[arg(long, global = true)]
    no_detect_arch: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build an image from a Containerfile
    Build {
        /// Image reference, e.g. harbor.nbfc.io/nubificus/hello:latest
        #[arg(short, long)]
        tag: String,

        /// Build file, relative to the working directory
        #[arg(short, long, default_value = DEFAULT_CONTAINERFILE)]
        file: PathBuf,

        #[command(flatten)]
        export: ExportArgs,

        /// Build context
        #[arg(default_value = ".")]
        context: PathBuf,
    },
    /// Package a unikernel binary without a Containerfile
    Package {
        #[arg(short, long)]
        tag: String,

        /// Unikernel binary to package
        #[arg(long)]
        unikernel: PathBuf,

        /// Unikernel type (e.g. rumprun, hvt, unikraft)
        #[arg(long = "type")]
        unikernel_type: String,

        /// Monitor that boots the unikernel (e.g. qemu, hvt, firecracker)
        #[arg(long)]
        hypervisor: String,

        #[arg(long, default_value = "")]
        cmdline: String,

        /// Extra files or directories copied to /extra/
        #[arg(long)]
        extra: Vec<PathBuf>,

        /// Target architecture; probed from the binary when omitted
        #[arg(long)]
        arch: Option<String>,

        #[command(flatten)]
        export: ExportArgs,
    },
    /// Build several contexts in parallel, each tagged <prefix>/<dir name>:latest
    Batch {
        /// Repository prefix for the generated tags
        #[arg(long)]
        prefix: String,

        #[command(flatten)]
        export: ExportArgs,

        #[arg(required = true)]
        contexts: Vec<PathBuf>,
    },
    /// Print version information
    Version,
}

#[derive(Args, Debug)]
struct ExportArgs {
    /// Output type
    #[arg(short, long, value_enum, default_value = "ctr")]
    output: OutputKind,

    /// Shorthand for --output tar
    #[arg(long)]
    tar: bool,

    #[arg(long, env = "CONTAINERD_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    namespace: String,

    #[arg(long, env = "CONTAINERD_ADDRESS", default_value = DEFAULT_CONTAINERD_ADDRESS)]
    address: String,

    #[arg(long, env = "CONTAINERD_SNAPSHOTTER")]
    snapshotter: Option<String>,
}

impl Cli {
    fn build_options(&self) -> BuildOptions {
        BuildOptions {
            detect_architecture: !self.no_detect_arch,
        }
    }
}

impl ExportArgs {
    fn output(&self) -> OutputKind {
        if self.tar {
            OutputKind::Tar
        } else {
            self.output
        }
    }

    fn target(&self) -> ImportTarget {
        ImportTarget {
            namespace: self.namespace.clone(),
            address: self.address.clone(),
            snapshotter: self.snapshotter.clone(),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.log_json) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let cwd = env::current_dir().context("Failed to read working directory")?;
    let options = cli.build_options();

    match cli.command {
        Command::Build {
            tag,
            file,
            export,
            context,
        } => {
            let config = BuildConfig::resolve(
                &context,
                &file,
                &cwd,
                &tag,
                export.output(),
                export.target(),
            )?;
            let image = pipeline::build_containerfile(
                &config.containerfile,
                &config.context_dir,
                options,
            )
            .with_context(|| format!("Failed to build {}", config.containerfile.display()))?;
            finish(
                image.image(),
                &config.reference,
                config.output,
                &cwd,
                &config.import_target,
            )
        }
        Command::Package {
            tag,
            unikernel,
            unikernel_type,
            hypervisor,
            cmdline,
            extra,
            arch,
            export,
        } => {
            let reference = ImageReference::parse(&tag)?;
            let params = PackageParams {
                unikernel,
                unikernel_type,
                hypervisor,
                cmdline,
                extra,
                arch,
            };
            let image = pipeline::package(&params, &cwd, options)
                .with_context(|| format!("Failed to package {}", params.unikernel.display()))?;
            finish(image.image(), &reference, export.output(), &cwd, &export.target())
        }
        Command::Batch {
            prefix,
            export,
            contexts,
        } => run_batch(&prefix, &contexts, &export, &cwd, options),
        Command::Version => {
            println!("bima {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn run_batch(
    prefix: &str,
    contexts: &[PathBuf],
    export: &ExportArgs,
    cwd: &Path,
    options: BuildOptions,
) -> Result<()> {
    let mut references = Vec::with_capacity(contexts.len());
    let mut requests = Vec::with_capacity(contexts.len());
    for context in contexts {
        let context_dir = cwd.join(context);
        let name = context_dir
            .canonicalize()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_lowercase()))
            .with_context(|| format!("Invalid build context {}", context.display()))?;
        references.push(ImageReference::parse(&format!("{}/{}:latest", prefix, name))?);
        let containerfile = bima::config::resolve_containerfile(
            Path::new(DEFAULT_CONTAINERFILE),
            &context_dir,
        )?;
        requests.push(BuildRequest {
            context_dir,
            containerfile,
        });
    }

    let results = pipeline::build_many(&requests, options);

    let mut failed = 0;
    for ((request, reference), result) in requests.iter().zip(&references).zip(results) {
        let outcome = result.map_err(anyhow::Error::from).and_then(|image| {
            finish(image.image(), reference, export.output(), cwd, &export.target())
        });
        if let Err(e) = outcome {
            error!(context = %request.context_dir.display(), "Build failed: {:#}", e);
            failed += 1;
        }
    }

    if failed > 0 {
        bail!("{} of {} builds failed", failed, requests.len());
    }
    Ok(())
}

fn finish(
    image: &OciImage,
    reference: &ImageReference,
    output: OutputKind,
    cwd: &Path,
    target: &ImportTarget,
) -> Result<()> {
    let importer = CtrImporter::default();
    match pipeline::export(image, reference, output, cwd, target, &importer)
        .with_context(|| format!("Failed to export {}", reference))?
    {
        ExportOutcome::Tarball(path) => info!(path = %path.display(), "Image saved"),
        ExportOutcome::Imported { report } => {
            info!(reference = %reference, "Image imported into containerd");
            if !report.is_empty() {
                println!("{}", report);
            }
        }
    }
    Ok(())
}
