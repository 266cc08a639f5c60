/*
* Licensed to Elasticsearch B.V. under one or more contributor
* license agreements. See the NOTICE file distributed with
* this work for additional information regarding copyright
* ownership. Elasticsearch B.V. licenses this file to you under
* the Apache License, Version 2.0 (the "License"); you may
* not use this file except in compliance with the License.
* You may obtain a copy of the License at
*
*  http://www.apache.org/licenses/LICENSE-2.0
*
* Unless required by applicable law or agreed to in writing,
* software distributed under the License is distributed on an
* "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
* KIND, either express or implied.  See the License for the
* specific language governing permissions and limitations
* under the License.
*/

//! The errors that can occur building or querying an index. Most failures
//! are caught at build time; queries only fail for malformed arguments.

use std::error::Error;
use std::fmt;

/// Helper type for a call that could go wrong.
pub type VantageResult<T> = Result<T, VantageError>;

/// Error type for this crate. Every fallible operation across every index
/// family returns one of these variants.
#[derive(Debug, Clone, PartialEq)]
pub enum VantageError {
    /// A parameter was out of range: a non-positive `k`, a negative radius,
    /// a leaf size below the family's floor, or similar.
    InvalidArgument(String),
    /// The supplied metric does not have a property the collection
    /// requires (e.g. the triangle inequality, or membership in the
    /// p-norm family for `KdTree`, or being Euclidean for `Dci`).
    InvalidMetric(String),
    /// The collection was queried before it was built, or was asked to
    /// perform an operation its family does not support (inserting into a
    /// `KdTree` or `Rbc`).
    InvalidState(String),
    /// A parallel build was aborted partway through; the collection has
    /// been reset to empty and the caller may retry.
    Interrupted,
}

impl fmt::Display for VantageError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            VantageError::InvalidArgument(ref msg) => write!(f, "invalid argument: {}", msg),
            VantageError::InvalidMetric(ref msg) => write!(f, "invalid metric: {}", msg),
            VantageError::InvalidState(ref msg) => write!(f, "invalid state: {}", msg),
            VantageError::Interrupted => {
                write!(f, "build was interrupted, the collection is now empty")
            }
        }
    }
}

impl Error for VantageError {
    fn cause(&self) -> Option<&dyn Error> {
        None
    }
}
