use std::{path::Path, sync::Arc};

use polyfold_shared::{
    log::{info, trace},
    ColorSpace, Handle, IndexingContainer,
};

use crate::{
    io::{self, ExportOptions},
    material::{BaseColor, Material},
    mesh::Mesh,
    texture::Image,
    Error, Result,
};

pub type ObjectHandle = Handle<Object>;
pub type ImageHandle = Handle<Image>;

/// Named instance of a mesh in the [`Scene`].
#[derive(Debug, Clone)]
pub struct Object {
    pub name: String,
    pub hidden: bool,
    mesh: Arc<Mesh>,
}

impl Object {
    pub fn new(name: impl Into<String>, mesh: Mesh) -> Self {
        Self {
            name: name.into(),
            hidden: false,
            mesh: Arc::new(mesh),
        }
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    /// Returns the mesh for modification. A mesh shared with another object is copied first.
    pub fn mesh_mut(&mut self) -> &mut Mesh {
        Arc::make_mut(&mut self.mesh)
    }

    /// Returns `true` if the mesh is also used by another object.
    pub fn shares_mesh_with(&self, other: &Object) -> bool {
        Arc::ptr_eq(&self.mesh, &other.mesh)
    }
}

/// Arena of the objects and images a pipeline run works on.
#[derive(Default)]
pub struct Scene {
    objects: IndexingContainer<Object>,
    images: IndexingContainer<Image>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_object(&mut self, object: Object) -> ObjectHandle {
        trace!("Adding object '{}' to the scene", object.name);
        self.objects.insert(object)
    }

    pub fn object(&self, handle: ObjectHandle) -> Result<&Object> {
        self.objects.get(&handle).ok_or(Error::StaleObject(handle))
    }

    pub fn object_mut(&mut self, handle: ObjectHandle) -> Result<&mut Object> {
        self.objects.get_mut(&handle).ok_or(Error::StaleObject(handle))
    }

    pub fn mesh(&self, handle: ObjectHandle) -> Result<&Mesh> {
        Ok(self.object(handle)?.mesh())
    }

    pub fn mesh_mut(&mut self, handle: ObjectHandle) -> Result<&mut Mesh> {
        Ok(self.object_mut(handle)?.mesh_mut())
    }

    pub fn objects(&self) -> impl Iterator<Item = (ObjectHandle, &Object)> {
        self.objects.iter()
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Creates a copy of the object whose geometry is owned independently of the original.
    pub fn duplicate(&mut self, handle: ObjectHandle, name: impl Into<String>) -> Result<ObjectHandle> {
        let object = self.object(handle)?;
        let duplicate = Object {
            name: name.into(),
            hidden: false,
            mesh: Arc::new(object.mesh().clone()),
        };
        trace!("Duplicated object '{}' as '{}'", object.name, duplicate.name);
        Ok(self.objects.insert(duplicate))
    }

    /// Removes the object. Images that are no longer referenced by any object are removed as well.
    pub fn delete(&mut self, handle: ObjectHandle) -> Result<()> {
        let object = self.objects.remove(&handle).ok_or(Error::StaleObject(handle))?;
        trace!("Deleted object '{}'", object.name);
        drop(object);
        self.remove_orphan_images();
        Ok(())
    }

    fn remove_orphan_images(&mut self) {
        let referenced = self
            .objects
            .iter()
            .filter_map(|(_, object)| object.mesh().material.as_ref())
            .flat_map(|material| material.images())
            .collect::<Vec<_>>();
        let orphans = self
            .images
            .iter()
            .map(|(handle, _)| handle)
            .filter(|handle| !referenced.contains(handle))
            .collect::<Vec<_>>();
        for orphan in orphans {
            if let Some(image) = self.images.remove(&orphan) {
                trace!("Removed unreferenced image '{}'", image.name);
            }
        }
    }

    pub fn add_image(&mut self, image: Image) -> ImageHandle {
        self.images.insert(image)
    }

    pub fn image(&self, handle: ImageHandle) -> Result<&Image> {
        self.images.get(&handle).ok_or(Error::StaleImage(handle))
    }

    pub fn image_mut(&mut self, handle: ImageHandle) -> Result<&mut Image> {
        self.images.get_mut(&handle).ok_or(Error::StaleImage(handle))
    }

    pub fn images(&self) -> impl Iterator<Item = (ImageHandle, &Image)> {
        self.images.iter()
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Imports the mesh file as a new object. Returns `None` when the file didn't produce geometry.
    pub fn import(&mut self, path: impl AsRef<Path>) -> Result<Option<ObjectHandle>> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::InputNotFound(path.to_owned()));
        }
        let Some(imported) = io::import(path)? else {
            return Ok(None);
        };
        let mut mesh = imported.mesh;
        if imported.base_color_image.is_some() || imported.normal_image.is_some() {
            let mut material = mesh.material.take().unwrap_or_else(|| Material::new(imported.name.clone()));
            if let Some(image) = imported.base_color_image {
                material.base_color = BaseColor::Image(self.add_image(image));
            }
            if let Some(image) = imported.normal_image {
                debug_assert_eq!(image.color_space, ColorSpace::NonColor);
                material.normal_map = Some(self.add_image(image));
            }
            mesh.material = Some(material);
        }
        info!(
            "Imported '{}' with {} vertices and {} polygons",
            imported.name,
            mesh.vertex_count(),
            mesh.polygon_count()
        );
        Ok(Some(self.add_object(Object::new(imported.name, mesh))))
    }

    /// Writes exactly the given object to a GLB file.
    pub fn export(&self, handle: ObjectHandle, path: impl AsRef<Path>, options: &ExportOptions) -> Result<()> {
        let object = self.object(handle)?;
        io::glb::export(self, object, path.as_ref(), options)?;
        info!("Exported '{}' to {}", object.name, path.as_ref().display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use polyfold_shared::nalgebra::Vector3;

    use super::*;
    use crate::primitives;

    #[test]
    fn duplicate_is_independent() {
        let mut scene = Scene::new();
        let original = scene.add_object(Object::new("original", primitives::cube(1.0)));
        let duplicate = scene.duplicate(original, "duplicate").unwrap();
        assert_eq!(scene.object_count(), 2);
        assert!(!scene.object(original).unwrap().shares_mesh_with(scene.object(duplicate).unwrap()));

        scene.mesh_mut(duplicate).unwrap().positions[0] = Vector3::new(10.0, 10.0, 10.0);
        assert_ne!(scene.mesh(original).unwrap().positions[0], Vector3::new(10.0, 10.0, 10.0));
        assert_eq!(scene.object(duplicate).unwrap().name, "duplicate");
    }

    #[test]
    fn delete_stale_handle() {
        let mut scene = Scene::new();
        let handle = scene.add_object(Object::new("cube", primitives::cube(1.0)));
        scene.delete(handle).unwrap();
        assert_eq!(scene.object_count(), 0);
        assert!(matches!(scene.delete(handle), Err(Error::StaleObject(_))));
        assert!(matches!(scene.object(handle), Err(Error::StaleObject(_))));
    }

    #[test]
    fn delete_removes_orphan_images() {
        let mut scene = Scene::new();
        let shared = scene.add_image(Image::new("shared", 1, 1, ColorSpace::Srgb));
        let private = scene.add_image(Image::new("private", 1, 1, ColorSpace::NonColor));

        let mut mesh = primitives::cube(1.0);
        mesh.material = Some(Material::new("a").with_base_color(BaseColor::Image(shared)));
        let a = scene.add_object(Object::new("a", mesh.clone()));
        mesh.material = Some(Material::new("b").with_base_color(BaseColor::Image(shared)).with_normal_map(private));
        let b = scene.add_object(Object::new("b", mesh));

        scene.delete(b).unwrap();
        assert_eq!(scene.image_count(), 1);
        assert!(scene.image(shared).is_ok());
        assert!(matches!(scene.image(private), Err(Error::StaleImage(_))));

        scene.delete(a).unwrap();
        assert_eq!(scene.image_count(), 0);
    }

    #[test]
    fn import_missing_file() {
        let mut scene = Scene::new();
        let result = scene.import("does/not/exist.obj");
        assert!(matches!(result, Err(Error::InputNotFound(_))));
        assert_eq!(scene.object_count(), 0);
    }
}
