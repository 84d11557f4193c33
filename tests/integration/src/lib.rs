//! End-to-end SSO and SLO tests for the fedsso workspace. The tests live
//! under `tests/`.
