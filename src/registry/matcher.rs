//! Release matching
//!
//! Selects which release a client should receive, given the client's mod
//! (runtime) version and the game versions it declares. Compatibility is
//! deliberately asymmetric: the mod version gates by major component only,
//! while game versions must match exactly.
//!
//! Two modes serve different endpoints:
//! - [`match_release`]: metadata lookup — major gate plus exact
//!   game-version intersection.
//! - [`latest_compatible`]: bulk script download — major gate only, game
//!   versions ignored.

use tracing::debug;

use crate::registry::models::Release;
use crate::version::Version;

/// A verified release with all of its version fields parsed.
struct Candidate<'a> {
    release: &'a Release,
    release_version: Version,
    mod_version: Version,
    game_versions: Vec<Version>,
}

/// Parse verified releases into candidates.
///
/// A release with any unparseable version field is corrupt historical data:
/// it is skipped with a debug log rather than failing the whole match.
fn candidates(releases: &[Release]) -> Vec<Candidate<'_>> {
    releases
        .iter()
        .filter(|r| r.verified)
        .filter_map(|release| {
            let parsed = parse_candidate(release);
            if parsed.is_none() {
                debug!(
                    release_id = %release.id,
                    release_version = %release.release_version,
                    "skipping release with unparseable version field"
                );
            }
            parsed
        })
        .collect()
}

fn parse_candidate(release: &Release) -> Option<Candidate<'_>> {
    let release_version = Version::parse(&release.release_version).ok()?;
    let mod_version = Version::parse(&release.mod_version).ok()?;
    let game_versions = release
        .game_versions
        .iter()
        .map(|v| Version::parse(v).ok())
        .collect::<Option<Vec<_>>>()?;
    Some(Candidate {
        release,
        release_version,
        mod_version,
        game_versions,
    })
}

/// Sort candidates newest-first by (release_version, mod_version).
///
/// The sort is stable, so releases tying on both keys keep insertion order
/// and the first-inserted one wins.
fn sort_newest_first(candidates: &mut [Candidate<'_>]) {
    candidates.sort_by(|a, b| {
        (b.release_version, b.mod_version).cmp(&(a.release_version, a.mod_version))
    });
}

/// Select the release to serve for a metadata request.
///
/// Walks verified releases newest-first, skips any built for a strictly
/// newer major mod version, and returns the first whose game versions
/// intersect the requested set by exact equality. `None` is a normal
/// negative result, not an error.
pub fn match_release<'a>(
    releases: &'a [Release],
    requested_mod: Version,
    requested_game: &[Version],
) -> Option<&'a Release> {
    let mut candidates = candidates(releases);
    sort_newest_first(&mut candidates);

    candidates
        .iter()
        .filter(|c| c.mod_version.major <= requested_mod.major)
        .find(|c| {
            c.game_versions
                .iter()
                .any(|gv| requested_game.contains(gv))
        })
        .map(|c| c.release)
}

/// Select the newest release compatible with the requested mod version,
/// ignoring game versions. Used by the bulk scripts-download endpoint.
pub fn latest_compatible<'a>(
    releases: &'a [Release],
    requested_mod: Version,
) -> Option<&'a Release> {
    let mut candidates = candidates(releases);
    sort_newest_first(&mut candidates);

    candidates
        .iter()
        .find(|c| c.mod_version.major <= requested_mod.major)
        .map(|c| c.release)
}
