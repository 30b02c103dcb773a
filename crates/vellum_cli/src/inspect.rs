//! `vellum inspect`: decode and validate an artifact header.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::Serialize;
use vellum_cache::{MappedArtifact, PixelLayout, RenderHeader, HEADER_LEN};

use crate::{GlobalArgs, InspectArgs};

/// Everything a header says about an artifact, plus whether the file agrees.
#[derive(Debug, Serialize)]
pub struct ArtifactReport {
    /// The artifact file.
    pub path: String,
    /// Logical width.
    pub width: f64,
    /// Logical height.
    pub height: f64,
    /// Device scale.
    pub scale: f64,
    /// Bitmap width.
    pub pixel_width: u32,
    /// Bitmap height.
    pub pixel_height: u32,
    /// Row stride in bytes.
    pub bytes_per_row: u64,
    /// Pixel region length.
    pub image_len: u64,
    /// Expected file length.
    pub total_len: u64,
    /// Pixel layout name.
    pub layout: &'static str,
    /// Whether the file's length and header match.
    pub valid: bool,
    /// Why the file is invalid, if it is.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub problem: Option<String>,
}

impl ArtifactReport {
    /// Builds a report for `header` found at `path`.
    pub fn new(path: &Path, header: &RenderHeader, problem: Option<String>) -> Self {
        Self {
            path: path.display().to_string(),
            width: header.size().width,
            height: header.size().height,
            scale: header.scale().get(),
            pixel_width: header.pixel_size().width,
            pixel_height: header.pixel_size().height,
            bytes_per_row: header.bytes_per_row(),
            image_len: header.image_len(),
            total_len: header.total_len(),
            layout: match header.layout() {
                PixelLayout::OpaqueSkipAlpha => "opaque",
                PixelLayout::PremultipliedAlpha => "premultiplied-alpha",
            },
            valid: problem.is_none(),
            problem,
        }
    }

    /// Prints the report as text or JSON.
    pub fn print(&self, json: bool) -> Result<(), Box<dyn std::error::Error>> {
        if json {
            println!("{}", serde_json::to_string_pretty(self)?);
            return Ok(());
        }
        println!("path:          {}", self.path);
        println!("logical size:  {}x{} @{}x", self.width, self.height, self.scale);
        println!("pixels:        {}x{}", self.pixel_width, self.pixel_height);
        println!("bytes per row: {}", self.bytes_per_row);
        println!("image length:  {}", self.image_len);
        println!("total length:  {}", self.total_len);
        println!("layout:        {}", self.layout);
        match &self.problem {
            None => println!("status:        ok"),
            Some(problem) => println!("status:        invalid ({problem})"),
        }
        Ok(())
    }
}

/// Reads the header at the start of `path` and checks the whole file against it.
pub fn inspect_file(path: &Path) -> Result<ArtifactReport, Box<dyn std::error::Error>> {
    let mut head = Vec::with_capacity(HEADER_LEN);
    File::open(path)?
        .take(HEADER_LEN as u64)
        .read_to_end(&mut head)?;
    let header = RenderHeader::decode(&head)?;
    let problem = MappedArtifact::open(path, &header)
        .err()
        .map(|e| e.to_string());
    Ok(ArtifactReport::new(path, &header, problem))
}

/// Runs the `vellum inspect` command.
///
/// Returns exit code 0 for a valid artifact and 1 otherwise.
pub fn run(args: &InspectArgs, _global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let report = inspect_file(&args.artifact)?;
    report.print(args.json)?;
    Ok(if report.valid { 0 } else { 1 })
}
