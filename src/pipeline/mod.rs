//! Pipeline stages for turning a picked image into a stored object.
//!
//! Each submodule implements exactly one step and can be tested without the
//! others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ transform ──▶ encode ──▶ upload
//! (decode)  (rotate/crop)  (webp)    (authorize + submit)
//!               │
//!               └──▶ hash (blurhash, alongside the upload)
//! ```
//!
//! 1. [`input`]: source files and the decoder; runs in `spawn_blocking`
//! 2. [`transform`]: rotated bounding geometry and the crop surface
//! 3. [`encode`]: lossless WebP payload with the final MIME type and size
//! 4. [`hash`]: blurhash encode/decode and placeholder data URLs
//! 5. [`upload`]: the two-phase signed upload; the only stage with
//!    network I/O

pub mod encode;
pub mod hash;
pub mod input;
pub mod transform;
pub mod upload;
