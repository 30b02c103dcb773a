//! `vellum render`: build (or reuse) the artifact for a key, size and scale.

use vellum_cache::MappedImage;
use vellum_common::{LogicalSize, Scale};

use crate::inspect::ArtifactReport;
use crate::session::{self, Session};
use crate::{GlobalArgs, RenderArgs, ReportFormat};

/// Requests the artifact and blocks until the cache answers.
pub fn render_artifact(
    session: &Session,
    args: &RenderArgs,
) -> Result<Option<MappedImage>, Box<dyn std::error::Error>> {
    let scale = Scale::new(args.scale)?;
    let size = LogicalSize::new(args.width, args.height);
    size.validate()?;

    let renders = session.cache.renders();
    let image = session.wait_for(|tx| {
        let completion = tx.clone();
        if let Some(hit) = renders.get(args.key.clone(), size, scale, move |_, image| {
            let _ = completion.send(image);
        }) {
            tracing::debug!(path = %hit.path().display(), "artifact already mapped");
            let _ = tx.send(Some(hit));
        }
    });
    Ok(image.flatten())
}

/// Runs the `vellum render` command.
///
/// Returns exit code 0 with a report of the artifact, or 1 when no original
/// exists for the key.
pub fn run(args: &RenderArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let session = session::open(global)?;
    let Some(image) = render_artifact(&session, args)? else {
        eprintln!("error: no original stored for '{}'", args.key);
        return Ok(1);
    };
    if !global.quiet {
        let report = ArtifactReport::new(image.path(), image.header(), None);
        report.print(args.format == ReportFormat::Json)?;
    }
    Ok(0)
}
