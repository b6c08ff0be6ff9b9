//! Core traits for lodforge

use crate::bounds::Aabb;
use crate::error::Result;
use crate::mesh::Mesh;
use crate::point::Point3f;

/// Objects with a spatial extent
pub trait Bounded {
    /// Get the bounding box of the object
    fn bounding_box(&self) -> Aabb;

    /// Get the center point of the object
    fn center(&self) -> Point3f {
        self.bounding_box().center()
    }
}

/// Host capability that supplies the input mesh of a job
pub trait MeshSource {
    fn load_mesh(&self) -> Result<Mesh>;
}

impl MeshSource for Mesh {
    fn load_mesh(&self) -> Result<Mesh> {
        Ok(self.clone())
    }
}

impl<F> MeshSource for F
where
    F: Fn() -> Result<Mesh>,
{
    fn load_mesh(&self) -> Result<Mesh> {
        self()
    }
}
