/*! Integration tests for Canopy.
 *
 * This test suite is organized as a single integration test binary
 * following the pattern described by matklad in
 * https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html
 *
 * The module structure mirrors the main library structure:
 * - room: Tests for the Room mutation API, acks, history, subscriptions and resync
 * - snapshot: Tests for derived caches fed by room storage
 * - wire: Tests for the JSON boundary and the channel transport
 */

use tracing_subscriber::EnvFilter;

#[ctor::ctor]
fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("canopy=info".parse().unwrap()),
        )
        .with_test_writer()
        .try_init();
}

mod helpers;
