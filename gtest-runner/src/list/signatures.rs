// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{TestDescriptor, parser::enclosed_type_param};
use crate::resolver::TEST_BODY_SIGNATURE;

/// Returns the candidate symbols of the function implementing a test, most likely first.
///
/// Typed tests have two candidates because compilers emit either form.
pub fn method_signatures(descriptor: &TestDescriptor) -> Vec<String> {
    if let Some(type_param) = &descriptor.type_param {
        return typed_test_signatures(descriptor, type_param);
    }
    if descriptor.param.is_some() {
        // Drop the instantiation prefix and the parameter index.
        let suite = descriptor
            .suite
            .split_once('/')
            .map_or(descriptor.suite.as_str(), |(_, suite)| suite);
        let name = descriptor
            .name
            .split_once('/')
            .map_or(descriptor.name.as_str(), |(name, _)| name);
        return vec![test_method_signature(suite, name, "")];
    }
    vec![test_method_signature(&descriptor.suite, &descriptor.name, "")]
}

fn typed_test_signatures(descriptor: &TestDescriptor, type_param: &str) -> Vec<String> {
    // Drop the type index, then the prefix of type-parameterized tests.
    let suite = descriptor
        .suite
        .rsplit_once('/')
        .map_or(descriptor.suite.as_str(), |(suite, _)| suite);
    let suite = suite.split_once('/').map_or(suite, |(_, suite)| suite);
    let type_param = enclosed_type_param(type_param);

    vec![
        test_method_signature(suite, &descriptor.name, &type_param),
        format!(
            "gtest_case_{suite}_::{}{type_param}{TEST_BODY_SIGNATURE}",
            descriptor.name
        ),
    ]
}

fn test_method_signature(suite: &str, name: &str, type_param: &str) -> String {
    format!("{suite}_{name}_Test{type_param}{TEST_BODY_SIGNATURE}")
}
