//! Component tests mounted from `tests/unit/`.

mod unit;
