//! Integration tests of the receive path, see `tests/`.
