/// Command Builder - turns untrusted source into an in-container command
///
/// **Injection rule:**
/// The source never reaches the shell as text. It is base64-encoded on the
/// host and the container decodes it to a fixed file before running the
/// toolchain. The base64 alphabet has no quote or shell metacharacters, so
/// the payload can sit inside a single-quoted word untouched.
///
/// **Shape:**
/// `sh -c "echo '<payload>' | base64 -d > <file> && <compile/run>"`
///
/// Compiler diagnostics go to the container's stdout/stderr like any other
/// program output.
use crate::error::ExecutionFailure;
use base64::{engine::general_purpose, Engine as _};
use snipbox_common::types::Language;

/// Scratch directory every sandbox works in (a tmpfs mount)
pub const WORK_DIR: &str = "/tmp";

/// Linux caps a single argv string at 128 KiB; stay below it
pub const MAX_ENCODED_SOURCE_BYTES: usize = 120 * 1024;

/// Everything the executor needs to know about what runs in the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxCommand {
    pub argv: Vec<String>,
    pub env: Vec<String>,
    /// Extra writable directory the toolchain needs (mounted as tmpfs)
    pub cache_dir: Option<&'static str>,
}

struct Toolchain {
    source_file: &'static str,
    run: &'static str,
    cache_dir: Option<&'static str>,
    env: &'static [&'static str],
}

fn toolchain(language: Language) -> Toolchain {
    match language {
        Language::Python => Toolchain {
            source_file: "/tmp/code.py",
            run: "python /tmp/code.py",
            cache_dir: None,
            env: &["PYTHONDONTWRITEBYTECODE=1"],
        },
        Language::Javascript => Toolchain {
            source_file: "/tmp/code.js",
            run: "node /tmp/code.js",
            cache_dir: None,
            env: &[],
        },
        Language::Java => Toolchain {
            source_file: "/tmp/Main.java",
            run: "javac /tmp/Main.java && java -cp /tmp Main",
            cache_dir: None,
            env: &[],
        },
        Language::Go => Toolchain {
            source_file: "/tmp/code.go",
            run: "go run /tmp/code.go",
            cache_dir: Some("/root/.cache"),
            env: &["GOCACHE=/root/.cache/go-build"],
        },
    }
}

fn encode_source(code: &str) -> Result<String, ExecutionFailure> {
    let encoded = general_purpose::STANDARD.encode(code.as_bytes());
    if encoded.len() > MAX_ENCODED_SOURCE_BYTES {
        return Err(ExecutionFailure::InvalidRequest(format!(
            "source code is too large ({} bytes)",
            code.len()
        )));
    }
    Ok(encoded)
}

fn shell(script: String) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script]
}

/// Build the decode-then-run command for a language
pub fn build_command(code: &str, language: Language) -> Result<SandboxCommand, ExecutionFailure> {
    let encoded = encode_source(code)?;
    let toolchain = toolchain(language);

    let script = format!(
        "echo '{}' | base64 -d > {} && {}",
        encoded, toolchain.source_file, toolchain.run
    );

    Ok(SandboxCommand {
        argv: shell(script),
        env: toolchain.env.iter().map(|e| e.to_string()).collect(),
        cache_dir: toolchain.cache_dir,
    })
}

/// Decode the source and print it back without running anything
pub fn decode_only(code: &str) -> Result<SandboxCommand, ExecutionFailure> {
    let encoded = encode_source(code)?;
    Ok(SandboxCommand {
        argv: shell(format!("echo '{}' | base64 -d", encoded)),
        env: Vec::new(),
        cache_dir: None,
    })
}
