// Copyright (c) the Satori contributors.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

/// Whether machine numbers are lowered to the solver's bit-vector and
/// floating point theories, or to unbounded integers and reals with explicit
/// IEEE-754 emulation. Fixed for the lifetime of a context.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Encoding {
    Exact,
    Abstract,
}

/// Represents the command line options and machine model parameters a
/// lowering context is constructed with.
#[derive(Clone, Debug)]
pub struct Options {
    pub encoding: Encoding,
    /// Width of a pointer's object id and offset fields, in bits.
    pub pointer_width: u32,
    /// Width of the default machine int, in bits.
    pub int_width: u32,
    /// Width of the machine word; used as the array domain width when the
    /// array size is symbolic or unbounded.
    pub word_size: u32,
    /// Adds a third capability-metadata field to every pointer record.
    pub capability_pointers: bool,
    /// If true, expressions with no lowering rule in the current mode become
    /// zero literals with a diagnostic instead of aborting.
    pub unsupported_exprs_as_zero: bool,
    /// If true, model values of unsupported shape are reported as zero with
    /// a diagnostic instead of aborting.
    pub unsupported_models_as_zero: bool,
}

impl Options {
    pub fn new(encoding: Encoding) -> Options {
        Options {
            encoding,
            pointer_width: 64,
            int_width: 32,
            word_size: 64,
            capability_pointers: false,
            unsupported_exprs_as_zero: false,
            unsupported_models_as_zero: false,
        }
    }
}

impl Default for Options {
    fn default() -> Options {
        Options::new(Encoding::Exact)
    }
}
