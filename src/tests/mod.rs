//! Scenario suites exercising the coordination engine end to end against a
//! local board and a temporary data directory.


#[cfg(test)]
mod coordination_tests;
