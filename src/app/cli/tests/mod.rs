//! Tests for command-line parsing and the configuration file
