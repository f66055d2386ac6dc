// Centralized constants for bima to avoid magic strings

/// Annotation naming the unikernel flavour (e.g. hvt, rumprun)
pub const UNIKERNEL_TYPE_ANNOTATION: &str = "com.urunc.unikernel.unikernelType";

/// Annotation naming the monitor that boots the unikernel
pub const HYPERVISOR_ANNOTATION: &str = "com.urunc.unikernel.hypervisor";

/// Annotation holding the in-image path of the unikernel binary
pub const BINARY_ANNOTATION: &str = "com.urunc.unikernel.binary";

/// Annotation holding the unikernel command line
pub const CMDLINE_ANNOTATION: &str = "com.urunc.unikernel.cmdline";

/// Annotations every unikernel image must carry before finalization
pub const REQUIRED_UNIKERNEL_ANNOTATIONS: [&str; 4] = [
    UNIKERNEL_TYPE_ANNOTATION,
    HYPERVISOR_ANNOTATION,
    BINARY_ANNOTATION,
    CMDLINE_ANNOTATION,
];

/// In-image path of the embedded annotation manifest
pub const METADATA_PATH: &str = "/urunc.json";

/// OS pinned on the scratch base image
pub const TARGET_OS: &str = "linux";

/// Architectures accepted by ARCH without a warning
pub const KNOWN_ARCHITECTURES: [&str; 7] =
    ["amd64", "arm64", "386", "arm", "riscv64", "ppc64le", "s390x"];

/// In-image directory for the unikernel binary in direct packaging mode
pub const UNIKERNEL_DIR: &str = "/unikernel/";

/// In-image directory for extra files in direct packaging mode
pub const EXTRA_DIR: &str = "/extra/";

pub const DEFAULT_CONTAINERFILE: &str = "Containerfile";
pub const FALLBACK_DOCKERFILE: &str = "Dockerfile";

pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_CONTAINERD_ADDRESS: &str = "/run/containerd/containerd.sock";

pub const OCI_LAYOUT_VERSION: &str = r#"{"imageLayoutVersion":"1.0.0"}"#;
pub const REF_NAME_ANNOTATION: &str = "org.opencontainers.image.ref.name";
pub const CONTAINERD_NAME_ANNOTATION: &str = "io.containerd.image.name";
