//! Binary archive stage
//!
//! Builds the toolchain on the target's builder and repackages the remote
//! `go/` tree through the release adjustments.

use std::io::{Read, Write};

use gorelease_archive::{
    adjust_tar, finish_tgz, tgz_reader, tgz_writer, Adjust, DropPatterns, DropUnwantedSysos, FixPermissions,
    FixupCrossCompile, DEFAULT_HOST_OSARCH,
};

use super::{make_env, StageError, GO_DIR};
use crate::catalog::Target;
use crate::session::{RemoteSession, SessionExec};

/// Settings for [`build_binary`] that come from the release configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryBuildOptions {
    /// Where the bootstrap toolchain is unpacked on the agent
    pub bootstrap_dir: String,
    /// GOOS_GOARCH of the machines cross-compiling builders run on
    pub host_osarch: String,
}

impl Default for BinaryBuildOptions {
    fn default() -> Self {
        Self {
            bootstrap_dir: "go1.4".to_string(),
            host_osarch: DEFAULT_HOST_OSARCH.to_string(),
        }
    }
}

/// Adjustments applied to a built toolchain tree, in order
pub fn binary_adjustments(target: &Target, builder: &str, host_osarch: &str) -> Result<Vec<Box<dyn Adjust>>, StageError> {
    let mut adjusts: Vec<Box<dyn Adjust>> = vec![
        Box::new(DropPatterns::defaults()?),
        Box::new(DropUnwantedSysos::new(&target.goos, &target.goarch)),
    ];
    if let Some(fixup) = FixupCrossCompile::for_builder(builder, &target.goos, &target.goarch, host_osarch) {
        adjusts.push(Box::new(fixup));
    }
    adjusts.push(Box::new(FixPermissions));
    Ok(adjusts)
}

/// Build the toolchain for `target` and write the binary archive to `out`
///
/// Pushes the source archive, installs the bootstrap toolchain if the
/// builder has one, runs the make script (and the race runtime build when
/// the target asks for it), then streams the remote `go` tree back through
/// the binary adjustments.
pub fn build_binary<W: Write>(
    session: &mut RemoteSession,
    target: &Target,
    source_tgz: &mut dyn Read,
    opts: &BinaryBuildOptions,
    out: W,
) -> Result<W, StageError> {
    let builder = session.builder().clone();
    let env = make_env(target, &builder);

    session.push_tar(source_tgz, "")?;
    session.push_bootstrap(&opts.bootstrap_dir)?;

    tracing::info!(target = %target.name, builder = %builder.name, "building toolchain");
    session.exec(
        &format!("{}/{}", GO_DIR, builder.make_script),
        SessionExec::with_args(builder.make_args.iter().cloned()).env(env.clone()),
    )?;

    if target.race {
        tracing::info!(target = %target.name, "building race detector runtime");
        session.run_go(SessionExec::with_args(["install", "-race", "std"]).env(env))?;
    }

    let adjusts = binary_adjustments(target, &builder.name, &opts.host_osarch)?;
    let tree = session.fetch_tar(GO_DIR)?;
    let mut reader = tgz_reader(tree);
    let mut writer = tgz_writer(out);
    let stats = adjust_tar(&mut reader, &mut writer, &format!("{}/", GO_DIR), &adjusts)?;
    tracing::info!(
        target = %target.name,
        written = stats.written,
        dropped = stats.dropped,
        "binary archive written"
    );

    Ok(finish_tgz(writer)?)
}
