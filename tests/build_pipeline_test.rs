use bima::config::{ImageReference, ImportTarget, OutputKind, PackageParams};
use bima::constants::{BINARY_ANNOTATION, CMDLINE_ANNOTATION, METADATA_PATH};
use bima::image::label::decode;
use bima::import::ImageImporter;
use bima::pipeline::{self, BuildOptions, ExportOutcome};
use bima::{BimaError, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

const EM_X86_64: u16 = 62;
const EM_AARCH64: u16 = 183;

fn elf_binary(machine: u16) -> Vec<u8> {
    let mut bin = vec![0u8; 128];
    bin[..4].copy_from_slice(b"\x7fELF");
    bin[4] = 2;
    bin[5] = 1;
    bin[18..20].copy_from_slice(&machine.to_le_bytes());
    bin
}

fn context(containerfile: &str, files: &[(&str, &[u8])]) -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("Containerfile"), containerfile).unwrap();
    for (path, content) in files {
        let path = dir.path().join(path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
    dir
}

fn build(dir: &TempDir) -> Result<bima::BimaImage> {
    pipeline::build_containerfile(
        &dir.path().join("Containerfile"),
        dir.path(),
        BuildOptions::default(),
    )
}

fn metadata(image: &bima::BimaImage) -> BTreeMap<String, String> {
    let raw = image.image().find_file(METADATA_PATH).expect("metadata layer");
    serde_json::from_slice(raw).unwrap()
}

const HELLO: &str = "FROM scratch
COPY app /unikernel/app
LABEL com.urunc.unikernel.binary=/unikernel/app
LABEL com.urunc.unikernel.cmdline=\"hello world\"
LABEL com.urunc.unikernel.unikernelType=rumprun
LABEL com.urunc.unikernel.hypervisor=qemu
ARCH arm64
";

#[test]
fn test_unikernel_build_end_to_end() {
    let dir = context(HELLO, &[("app", b"binary")]);
    let image = build(&dir).unwrap();

    let config = image.image().config_file();
    assert_eq!(config.architecture, "arm64");
    assert_eq!(config.os, "linux");
    assert_eq!(config.config.cmd, Some(vec!["/unikernel/app".to_string()]));

    assert_eq!(
        image.image().find_file("/unikernel/app"),
        Some(&b"binary"[..])
    );

    let meta = metadata(&image);
    assert_eq!(meta.len(), 4);
    assert_eq!(
        decode(CMDLINE_ANNOTATION, &meta[CMDLINE_ANNOTATION]).unwrap(),
        "hello world"
    );
    assert_eq!(&meta, image.image().annotations());
}

#[test]
fn test_missing_cmdline_label() {
    let content = HELLO.replace("LABEL com.urunc.unikernel.cmdline=\"hello world\"\n", "");
    let dir = context(&content, &[("app", b"binary")]);
    match build(&dir).unwrap_err() {
        BimaError::MissingRequiredLabels { missing } => {
            assert_eq!(missing, vec![CMDLINE_ANNOTATION.to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_unsupported_instruction_aborts_build() {
    let dir = context("FROM scratch\nRUN make\n", &[]);
    let err = build(&dir).unwrap_err();
    assert!(err.to_string().contains("RUN"));
}

#[test]
fn test_missing_copy_source() {
    let dir = context("COPY nothing /unikernel/\n", &[]);
    assert!(matches!(build(&dir).unwrap_err(), BimaError::SourceNotFound { .. }));
}

#[test]
fn test_directory_copy_keeps_structure() {
    let dir = context(
        "COPY rootfs /data\nLABEL com.urunc.iot.entry=/data/bin/run\nARCH amd64\n",
        &[("rootfs/bin/run", b"run"), ("rootfs/etc/conf", b"conf")],
    );
    let image = build(&dir).unwrap();
    assert_eq!(image.image().find_file("/data/bin/run"), Some(&b"run"[..]));
    assert_eq!(image.image().find_file("/data/etc/conf"), Some(&b"conf"[..]));
    // iot images get no command
    assert_eq!(image.image().config_file().config.cmd, None);
}

#[test]
fn test_last_label_and_arch_win() {
    let content = format!("{}LABEL com.urunc.unikernel.hypervisor=hvt\nARCH amd64\n", HELLO);
    let dir = context(&content, &[("app", b"binary")]);
    let image = build(&dir).unwrap();

    assert_eq!(image.image().config_file().architecture, "amd64");
    assert_eq!(image.labels().len(), 4);
    let meta = metadata(&image);
    assert_eq!(
        decode("hypervisor", &meta["com.urunc.unikernel.hypervisor"]).unwrap(),
        "hvt"
    );
}

#[test]
fn test_architecture_detected_from_binary() {
    let content = HELLO.replace("ARCH arm64\n", "");
    let dir = context(&content, &[("app", &elf_binary(EM_X86_64))]);
    let image = build(&dir).unwrap();
    assert_eq!(image.image().config_file().architecture, "amd64");

    let dir = context(&content, &[("app", &elf_binary(EM_AARCH64))]);
    let image = build(&dir).unwrap();
    assert_eq!(image.image().config_file().architecture, "arm64");
}

#[test]
fn test_architecture_detected_from_last_copy() {
    let content = "FROM scratch
COPY old/app /unikernel/
COPY new/app /unikernel/
LABEL com.urunc.unikernel.binary=/unikernel/app
LABEL com.urunc.unikernel.cmdline=\"\"
LABEL com.urunc.unikernel.unikernelType=hvt
LABEL com.urunc.unikernel.hypervisor=hvt
";
    let arm64 = elf_binary(EM_AARCH64);
    let dir = context(
        content,
        &[("old/app", &elf_binary(EM_X86_64)), ("new/app", &arm64)],
    );
    let image = build(&dir).unwrap();

    assert_eq!(image.image().find_file("/unikernel/app"), Some(&arm64[..]));
    assert_eq!(image.image().config_file().architecture, "arm64");
}

#[test]
fn test_quoted_labels_and_directory_destination() {
    let content = r#"FROM scratch
COPY app /unikernel/
LABEL "com.urunc.unikernel.binary"="/unikernel/app"
LABEL "com.urunc.unikernel.cmdline"="hello world"
LABEL "com.urunc.unikernel.unikernelType"="rumprun"
LABEL "com.urunc.unikernel.hypervisor"="qemu"
ARCH arm64
"#;
    let dir = context(content, &[("app", b"binary")]);
    let image = build(&dir).unwrap();

    let config = image.image().config_file();
    assert_eq!(config.architecture, "arm64");
    assert_eq!(config.config.cmd, Some(vec!["/unikernel/app".to_string()]));
    assert_eq!(image.image().find_file("/unikernel/app"), Some(&b"binary"[..]));

    let meta = metadata(&image);
    let keys: Vec<&str> = meta.keys().map(String::as_str).collect();
    assert_eq!(
        keys,
        vec![
            "com.urunc.unikernel.binary",
            "com.urunc.unikernel.cmdline",
            "com.urunc.unikernel.hypervisor",
            "com.urunc.unikernel.unikernelType",
        ]
    );
    assert_eq!(
        decode(BINARY_ANNOTATION, &meta[BINARY_ANNOTATION]).unwrap(),
        "/unikernel/app"
    );
}

#[test]
fn test_architecture_required_without_detection() {
    let content = HELLO.replace("ARCH arm64\n", "");
    let dir = context(&content, &[("app", &elf_binary(EM_X86_64))]);
    let err = pipeline::build_containerfile(
        &dir.path().join("Containerfile"),
        dir.path(),
        BuildOptions {
            detect_architecture: false,
        },
    )
    .unwrap_err();
    assert!(matches!(err, BimaError::ArchitectureNotSet));
}

#[test]
fn test_binary_not_copied() {
    let content = HELLO
        .replace("ARCH arm64\n", "")
        .replace("COPY app /unikernel/app\n", "");
    let dir = context(&content, &[]);
    assert!(matches!(
        build(&dir).unwrap_err(),
        BimaError::UnikernelNotCopied { .. }
    ));
}

#[test]
fn test_package_builds_unikernel_image() {
    let dir = context("", &[("app.hvt", &elf_binary(EM_X86_64)), ("extra/data.txt", b"data")]);
    let params = PackageParams {
        unikernel: PathBuf::from("app.hvt"),
        unikernel_type: "hvt".to_string(),
        hypervisor: "hvt".to_string(),
        cmdline: String::new(),
        extra: vec![PathBuf::from("extra/data.txt")],
        arch: None,
    };
    let image = pipeline::package(&params, dir.path(), BuildOptions::default()).unwrap();

    let config = image.image().config_file();
    assert_eq!(config.architecture, "amd64");
    assert_eq!(config.config.cmd, Some(vec!["/unikernel/app.hvt".to_string()]));
    assert!(image.image().find_file("/extra/data.txt").is_some());
    assert_eq!(
        decode(BINARY_ANNOTATION, &metadata(&image)[BINARY_ANNOTATION]).unwrap(),
        "/unikernel/app.hvt"
    );
}

#[derive(Default)]
struct RecordingImporter {
    calls: Mutex<Vec<(PathBuf, bool)>>,
}

impl ImageImporter for RecordingImporter {
    fn import(&self, tarball: &Path, _target: &ImportTarget) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((tarball.to_path_buf(), tarball.exists()));
        Ok("unpacking done".to_string())
    }
}

fn tar_entries(path: &Path) -> BTreeSet<String> {
    let mut archive = tar::Archive::new(File::open(path).unwrap());
    archive
        .entries()
        .unwrap()
        .map(|e| e.unwrap().path().unwrap().display().to_string())
        .collect()
}

#[test]
fn test_export_tarball() {
    let dir = context(HELLO, &[("app", b"binary")]);
    let image = build(&dir).unwrap();
    let out = TempDir::new().unwrap();
    let reference = ImageReference::parse("harbor.nbfc.io/nubificus/hello:latest").unwrap();
    let importer = RecordingImporter::default();

    let outcome = pipeline::export(
        image.image(),
        &reference,
        OutputKind::Tar,
        out.path(),
        &ImportTarget::default(),
        &importer,
    )
    .unwrap();

    let tarball = out.path().join("hello:latest");
    assert_eq!(outcome, ExportOutcome::Tarball(tarball.clone()));
    assert!(importer.calls.lock().unwrap().is_empty());

    let entries = tar_entries(&tarball);
    for expected in ["oci-layout", "index.json", "manifest.json"] {
        assert!(entries.contains(expected), "missing {expected}");
    }
    // two layers, config and manifest
    assert_eq!(entries.iter().filter(|e| e.starts_with("blobs/sha256/")).count(), 4);
}

#[test]
fn test_export_ctr_imports_and_removes_tarball() {
    let dir = context(HELLO, &[("app", b"binary")]);
    let image = build(&dir).unwrap();
    let out = TempDir::new().unwrap();
    let reference = ImageReference::parse("hello").unwrap();
    let importer = RecordingImporter::default();

    let outcome = pipeline::export(
        image.image(),
        &reference,
        OutputKind::Ctr,
        out.path(),
        &ImportTarget::default(),
        &importer,
    )
    .unwrap();

    assert_eq!(
        outcome,
        ExportOutcome::Imported {
            report: "unpacking done".to_string()
        }
    );
    let calls = importer.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].1, "tarball must exist during import");
    assert!(!calls[0].0.exists());
}

#[test]
fn test_builds_are_reproducible() {
    let dir = context(HELLO, &[("app", b"binary")]);
    let first = build(&dir).unwrap();
    let second = build(&dir).unwrap();
    assert_eq!(
        first.image().config_blob().unwrap(),
        second.image().config_blob().unwrap()
    );
    assert_eq!(
        first.image().manifest().unwrap().layers[0].digest,
        second.image().manifest().unwrap().layers[0].digest
    );
}
