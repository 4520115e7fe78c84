//! Pluggable sparse linear solvers.
//!
//! Every solver goes through the same lifecycle: configure, analyze the
//! sparsity pattern, factorize, solve, read diagnostics. Solvers are picked
//! by name through [`factory::create`]; iterative ones drive a Krylov
//! backend through a narrow contract so the numerical engine can be swapped
//! without touching the adapters.
//!
//! ```no_run
//! use linsolve::{factory, LinearSolver, SparseMatrixView};
//! use nalgebra::DVector;
//!
//! let a = SparseMatrixView::from_entries(2, &[(0, 0, 4.0), (1, 1, 2.0)]).unwrap();
//! let mut solver = factory::create("GMRES").unwrap();
//! solver.set_parameters(&serde_json::json!({"conv_tol": 1e-10}));
//! solver.analyze_pattern(&a, 0).unwrap();
//! solver.factorize(&a).unwrap();
//! let mut x = DVector::zeros(2);
//! solver.solve(&DVector::from_vec(vec![4.0, 2.0]), &mut x).unwrap();
//! println!("{}", solver.info().to_json());
//! ```

pub mod adapter;
pub mod backend;
pub mod config;
pub mod direct;
pub mod error;
pub mod factory;
pub mod iterative;
pub mod matrix;
pub mod saddle_point;
pub mod traits;

pub use adapter::BackendMatrixAdapter;
pub use backend::{KrylovBackend, KrylovMethod, NativeKrylov, PreconditionerKind};
pub use config::SolverConfig;
#[cfg(feature = "lapack")]
pub use direct::LapackCholesky;
pub use direct::{DenseLu, SparseCholesky};
pub use error::{Result, SolverError};
pub use factory::{available_solvers, create, default_solver};
pub use iterative::{AdapterState, IterativeSolver};
pub use matrix::SparseMatrixView;
pub use saddle_point::SaddlePointSolver;
pub use traits::{Diagnostics, LinearSolver};
