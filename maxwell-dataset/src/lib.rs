#![warn(unused_qualifications)]

//! Training data for neural Maxwell solvers.
//!
//! A [`DatasetBuilder`] draws random permittivity blocks from a
//! [`PermittivityGenerator`], solves each of them (and the same source in
//! vacuum) with an [`OpenSimulation`](fdfd_solver::OpenSimulation) and writes
//! the results as [`Record`]s into a [`Batch`] of a [`DatasetStore`].

pub mod builder;
pub mod generator;
pub mod store;

#[cfg(feature = "rayon")]
pub use crate::builder::MultiThreaded;
pub use crate::{
    builder::{
        BuildError,
        BuildReport,
        BuilderConfig,
        DatasetBuilder,
        FailurePolicy,
        RecordForEach,
        SingleThreaded,
    },
    generator::{
        EllipseInclusion,
        GeneratorConfig,
        GeneratorKind,
        PermittivityGenerator,
        RectangleInclusion,
        UniformFill,
    },
    store::{
        Batch,
        DatasetStore,
        Record,
        Schema,
        StoreError,
    },
};
