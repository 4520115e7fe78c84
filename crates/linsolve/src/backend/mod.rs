//! Native numerical backend.
//!
//! Everything the adapters need from a sparse solver library, behind the
//! narrow [`KrylovBackend`] contract:
//!
//! ```text
//! SparseMatrixView
//!         │  (BackendMatrixAdapter: row sizes, values, commit)
//!         ▼
//! IjMatrix ×P ──assemble──▶ ParCsrMatrix (P row partitions)
//!                                 │
//!                                 ▼
//!            KrylovBackend: set_params → setup → solve
//!                                 │
//!                    ┌────────────┼────────────┐
//!                    ▼            ▼            ▼
//!                 GMRES(m)        CG        BiCGSTAB
//!                    └──── preconditioner ─────┘
//! ```

pub mod ij_matrix;
pub mod krylov;
pub mod native;
pub mod par_csr;
pub mod precond;
pub mod traits;

pub use ij_matrix::IjMatrix;
pub use native::NativeKrylov;
pub use par_csr::{LocalCsr, ParCsrMatrix};
pub use precond::{BlockJacobi, IdentityPreconditioner, Preconditioner};
pub use traits::*;
