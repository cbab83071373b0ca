//! External-tool split backend.
//!
//! Every operation shells out to a standard command-line program:
//!
//! | Operation | libvips toolkit | ImageMagick toolkit |
//! |---|---|---|
//! | Fetch | `curl --fail` | `curl --fail` |
//! | Identify | `vipsheader` | `identify -format "%w %h"` |
//! | Render | `vips crop` per chunk | `convert -crop` per chunk |
//! | Archive | `zip -j` | `zip -j` |
//!
//! There is no shared decode step: each chunk is a separate crop invocation
//! against the downloaded original, and the output is always JPEG.

use super::backend::{BackendError, Dimensions, SplitBackend};
use super::params::{ArchiveParams, CropParams, RenderParams};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;
use tracing::debug;

/// Which image toolkit the CLI backend drives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Toolkit {
    /// `vipsheader` + `vips crop`.
    #[default]
    Vips,
    /// `identify` + `convert`.
    Imagemagick,
}

/// Backend that drives `curl`, an image toolkit and `zip`.
pub struct CliBackend {
    toolkit: Toolkit,
}

impl CliBackend {
    pub fn new(toolkit: Toolkit) -> Self {
        Self { toolkit }
    }

    pub fn toolkit(&self) -> Toolkit {
        self.toolkit
    }
}

/// Run a command to completion and return its stdout.
///
/// On a non-zero exit the error carries stdout and stderr together, since
/// these tools are inconsistent about which stream they report on.
fn run_tool(mut cmd: Command) -> Result<String, String> {
    let program = cmd.get_program().to_string_lossy().to_string();
    let output = cmd
        .output()
        .map_err(|e| format!("failed to run {program}: {e}"))?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!(
            "{program} exited with {}: {}",
            output.status,
            format!("{stdout}{stderr}").trim()
        ));
    }
    Ok(stdout)
}

fn parse_dimension(token: &str, what: &str, output: &str) -> Result<u32, BackendError> {
    token.parse::<u32>().map_err(|e| {
        BackendError::Probe(format!("failed to parse image {what} from {output:?}: {e}"))
    })
}

/// Parse ImageMagick `identify -format "%w %h"` output, e.g. `"1170 5000"`.
///
/// Exactly two whitespace-separated non-negative integers are accepted.
pub fn parse_identify_output(output: &str) -> Result<Dimensions, BackendError> {
    let tokens: Vec<&str> = output.split_whitespace().collect();
    let [w, h] = tokens.as_slice() else {
        return Err(BackendError::Probe(format!(
            "unexpected output from identify command: {output:?}"
        )));
    };
    Ok(Dimensions {
        width: parse_dimension(w, "width", output)?,
        height: parse_dimension(h, "height", output)?,
    })
}

/// Parse libvips `vipsheader` output, e.g.
/// `"cteam_01.jpg: 1170x5000 uchar, 3 bands, srgb, jpegload"`.
///
/// The dimensions are the first token after the last `:`, so paths that
/// contain colons still parse.
pub fn parse_vipsheader_output(output: &str) -> Result<Dimensions, BackendError> {
    let trimmed = output.trim();
    let (_, rest) = trimmed.rsplit_once(':').ok_or_else(|| {
        BackendError::Probe(format!(
            "unexpected output format from vipsheader: {trimmed:?}"
        ))
    })?;

    let token = rest.split_whitespace().next().ok_or_else(|| {
        BackendError::Probe(format!(
            "unexpected dimension format from vipsheader: {trimmed:?}"
        ))
    })?;

    let parts: Vec<&str> = token.split('x').collect();
    let [w, h] = parts.as_slice() else {
        return Err(BackendError::Probe(format!(
            "unexpected dimension format from vipsheader: {token:?}"
        )));
    };
    Ok(Dimensions {
        width: parse_dimension(w, "width", trimmed)?,
        height: parse_dimension(h, "height", trimmed)?,
    })
}

/// Build the crop command for one chunk.
fn crop_command(toolkit: Toolkit, source: &Path, crop: &CropParams, quality: u32) -> Command {
    match toolkit {
        Toolkit::Vips => {
            let mut cmd = Command::new("vips");
            cmd.arg("crop")
                .arg(source)
                .arg(format!("{}[Q={}]", crop.output.display(), quality))
                .arg(crop.x.to_string())
                .arg(crop.y.to_string())
                .arg(crop.width.to_string())
                .arg(crop.height.to_string());
            cmd
        }
        Toolkit::Imagemagick => {
            let mut cmd = Command::new("convert");
            cmd.arg(source)
                .arg("-crop")
                .arg(format!(
                    "{}x{}+{}+{}",
                    crop.width, crop.height, crop.x, crop.y
                ))
                .arg("-quality")
                .arg(quality.to_string())
                .arg(&crop.output);
            cmd
        }
    }
}

impl SplitBackend for CliBackend {
    fn fetch(&self, url: &str, dest: &Path) -> Result<(), BackendError> {
        let mut cmd = Command::new("curl");
        cmd.args(["--silent", "--show-error", "--fail", "--output"])
            .arg(dest)
            .arg(url);
        run_tool(cmd).map_err(BackendError::Fetch)?;

        // curl skips creating the output file when the body is empty.
        let bytes = match std::fs::metadata(dest) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => {
                return Err(BackendError::Fetch(format!(
                    "failed to verify downloaded file: {e}"
                )));
            }
        };
        if bytes == 0 {
            return Err(BackendError::Fetch("downloaded file is empty".into()));
        }
        debug!(url, bytes, dest = %dest.display(), "downloaded source with curl");
        Ok(())
    }

    fn identify(&self, path: &Path) -> Result<Dimensions, BackendError> {
        match self.toolkit {
            Toolkit::Vips => {
                let mut cmd = Command::new("vipsheader");
                cmd.arg(path);
                let out = run_tool(cmd).map_err(BackendError::Probe)?;
                parse_vipsheader_output(&out)
            }
            Toolkit::Imagemagick => {
                let mut cmd = Command::new("identify");
                cmd.args(["-format", "%w %h"]).arg(path);
                let out = run_tool(cmd).map_err(BackendError::Probe)?;
                parse_identify_output(&out)
            }
        }
    }

    fn render(&self, params: &RenderParams) -> Result<(), BackendError> {
        for crop in &params.crops {
            let cmd = crop_command(self.toolkit, &params.source, crop, params.quality.value());
            run_tool(cmd).map_err(BackendError::Render)?;
            debug!(output = %crop.output.display(), "rendered chunk");
        }
        Ok(())
    }

    fn archive(&self, params: &ArchiveParams) -> Result<(), BackendError> {
        let mut cmd = Command::new("zip");
        cmd.arg("-j").arg(&params.output).args(&params.entries);
        run_tool(cmd).map_err(BackendError::Archive)?;
        Ok(())
    }

    fn uses_external_tools(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{TestServer, png_bytes};
    use std::ffi::OsStr;
    use std::path::PathBuf;

    fn args(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect()
    }

    fn sample_crop() -> CropParams {
        CropParams {
            output: PathBuf::from("/data/1700000000/scan_02.jpg"),
            x: 0,
            y: 5000,
            width: 1500,
            height: 2000,
        }
    }

    // =========================================================================
    // identify parser
    // =========================================================================

    #[test]
    fn identify_two_integers() {
        let dims = parse_identify_output("1170 5000").unwrap();
        assert_eq!(dims, Dimensions { width: 1170, height: 5000 });
    }

    #[test]
    fn identify_tolerates_surrounding_whitespace() {
        let dims = parse_identify_output("  800\t12000\n").unwrap();
        assert_eq!(dims, Dimensions { width: 800, height: 12000 });
    }

    #[test]
    fn identify_wrong_field_count() {
        assert!(matches!(parse_identify_output("1170"), Err(BackendError::Probe(_))));
        assert!(matches!(parse_identify_output("1 2 3"), Err(BackendError::Probe(_))));
        assert!(matches!(parse_identify_output(""), Err(BackendError::Probe(_))));
    }

    #[test]
    fn identify_non_numeric() {
        assert!(matches!(parse_identify_output("wide 5000"), Err(BackendError::Probe(_))));
        assert!(matches!(parse_identify_output("-5 5000"), Err(BackendError::Probe(_))));
    }

    // =========================================================================
    // vipsheader parser
    // =========================================================================

    #[test]
    fn vipsheader_typical_line() {
        let dims =
            parse_vipsheader_output("cteam_01.jpg: 1170x5000 uchar, 3 bands, srgb, jpegload\n")
                .unwrap();
        assert_eq!(dims, Dimensions { width: 1170, height: 5000 });
    }

    #[test]
    fn vipsheader_absolute_path() {
        let dims = parse_vipsheader_output(
            "/srv/split/1700000000/original_image.png: 2000x12000 uchar, 4 bands, srgb, pngload",
        )
        .unwrap();
        assert_eq!(dims, Dimensions { width: 2000, height: 12000 });
    }

    #[test]
    fn vipsheader_missing_colon() {
        assert!(matches!(
            parse_vipsheader_output("1170x5000 uchar"),
            Err(BackendError::Probe(_))
        ));
    }

    #[test]
    fn vipsheader_missing_dimension_token() {
        assert!(matches!(
            parse_vipsheader_output("a.jpg:   "),
            Err(BackendError::Probe(_))
        ));
    }

    #[test]
    fn vipsheader_bad_dimension_token() {
        assert!(matches!(
            parse_vipsheader_output("a.jpg: 1170 uchar"),
            Err(BackendError::Probe(_))
        ));
        assert!(matches!(
            parse_vipsheader_output("a.jpg: 1x2x3 uchar"),
            Err(BackendError::Probe(_))
        ));
        assert!(matches!(
            parse_vipsheader_output("a.jpg: AxB uchar"),
            Err(BackendError::Probe(_))
        ));
    }

    // =========================================================================
    // command construction
    // =========================================================================

    #[test]
    fn vips_crop_arguments() {
        let cmd = crop_command(Toolkit::Vips, Path::new("/src.png"), &sample_crop(), 90);
        assert_eq!(cmd.get_program(), OsStr::new("vips"));
        assert_eq!(
            args(&cmd),
            vec![
                "crop",
                "/src.png",
                "/data/1700000000/scan_02.jpg[Q=90]",
                "0",
                "5000",
                "1500",
                "2000"
            ]
        );
    }

    #[test]
    fn convert_crop_arguments() {
        let cmd = crop_command(Toolkit::Imagemagick, Path::new("/src.jpg"), &sample_crop(), 85);
        assert_eq!(cmd.get_program(), OsStr::new("convert"));
        assert_eq!(
            args(&cmd),
            vec![
                "/src.jpg",
                "-crop",
                "1500x2000+0+5000",
                "-quality",
                "85",
                "/data/1700000000/scan_02.jpg"
            ]
        );
    }

    #[test]
    fn missing_program_reports_failure() {
        let err = run_tool(Command::new("definitely-not-an-installed-tool-xyz")).unwrap_err();
        assert!(err.contains("failed to run definitely-not-an-installed-tool-xyz"));
    }

    // =========================================================================
    // curl fetch
    // =========================================================================

    fn have_curl() -> bool {
        Command::new("curl")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[test]
    fn curl_fetch_writes_body() {
        if !have_curl() {
            println!("curl not found, skipping");
            return;
        }
        let server = TestServer::start(vec![("/a.png", png_bytes(4, 4))]);
        let tmp = tempfile::TempDir::new().unwrap();
        let dest = tmp.path().join("original_image.png");

        CliBackend::new(Toolkit::Vips)
            .fetch(&server.url("a.png"), &dest)
            .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), png_bytes(4, 4));
    }

    #[test]
    fn curl_fetch_404_is_fetch_error() {
        if !have_curl() {
            println!("curl not found, skipping");
            return;
        }
        let server = TestServer::start(vec![]);
        let tmp = tempfile::TempDir::new().unwrap();

        let result = CliBackend::new(Toolkit::Vips)
            .fetch(&server.url("missing.png"), &tmp.path().join("original_image.png"));

        let Err(BackendError::Fetch(msg)) = &result else {
            panic!("expected fetch error, got {result:?}");
        };
        assert!(msg.contains("curl exited with"), "{msg}");
    }

    #[test]
    fn curl_fetch_empty_body_is_fetch_error() {
        if !have_curl() {
            println!("curl not found, skipping");
            return;
        }
        let server = TestServer::start(vec![("/empty.png", Vec::new())]);
        let tmp = tempfile::TempDir::new().unwrap();

        let result = CliBackend::new(Toolkit::Vips)
            .fetch(&server.url("empty.png"), &tmp.path().join("original_image.png"));

        assert!(
            matches!(&result, Err(BackendError::Fetch(msg)) if msg == "downloaded file is empty"),
            "{result:?}"
        );
    }

    #[test]
    fn cli_backend_reports_external_tools() {
        let backend = CliBackend::new(Toolkit::Imagemagick);
        assert!(backend.uses_external_tools());
        assert_eq!(backend.toolkit(), Toolkit::Imagemagick);
    }

    #[test]
    fn toolkit_deserializes_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            toolkit: Toolkit,
        }
        let w: Wrapper = toml::from_str("toolkit = \"imagemagick\"").unwrap();
        assert_eq!(w.toolkit, Toolkit::Imagemagick);
        assert_eq!(Toolkit::default(), Toolkit::Vips);
    }
}
