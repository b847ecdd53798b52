//! Built-in tests

use crate::assertions::{assert_distinct_parents, assert_reparented, assert_unparented, NOT_REPARENTED};
use crate::error::TestFailure;
use crate::runner::{TestCase, TestContext};

/// Windows that exist before the manager starts get framed once it is ready
pub fn reparent(ctx: &mut TestContext) -> Result<(), TestFailure> {
    let a = ctx.make_window()?;
    let b = ctx.make_window()?;

    assert_unparented(&[&a, &b])?;

    ctx.start_wm()?;

    let parents = assert_reparented(&[&a, &b], ctx.reparent_policy())?;
    assert_distinct_parents(&parents)
}

/// A window mapped while the manager is already running gets framed too
pub fn reparent_after_start(ctx: &mut TestContext) -> Result<(), TestFailure> {
    ctx.start_wm()?;

    let window = ctx.make_window()?;
    match ctx.wait_for_parent(&window)? {
        Some(_) => Ok(()),
        None => Err(TestFailure::assertion(NOT_REPARENTED)),
    }
}

/// Every built-in test, in run order
pub fn builtin() -> Vec<TestCase> {
    vec![
        TestCase::new("reparent", reparent),
        TestCase::new("reparent-after-start", reparent_after_start),
    ]
}

pub fn find<'a>(tests: &'a [TestCase], name: &str) -> Option<&'a TestCase> {
    tests.iter().find(|test| test.name() == name)
}
