//! Process boundary to the external image-to-mesh generator.

use std::{
    path::{Path, PathBuf},
    process::Command,
};

use polyfold_shared::{
    log::{error, info},
    thiserror,
};

use crate::{config::GeneratorSettings, PipelineMode};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Input image not found: {0}")]
    ImageNotFound(PathBuf),
    #[error("Failed to start '{program}': {error_message}")]
    FailedToStart { program: String, error_message: String },
    #[error("'{program}' exited with {status}")]
    Unsuccessful { program: String, status: String },
    #[error("The generator didn't produce {0}")]
    MeshMissing(PathBuf),
    #[error("IoError: {0}")]
    IoError(#[from] std::io::Error),
}

/// Runs the configured generator command for an input image.
#[derive(Debug, Clone)]
pub struct ExternalGenerator {
    settings: GeneratorSettings,
}

impl ExternalGenerator {
    pub fn new(settings: GeneratorSettings) -> Self {
        Self { settings }
    }

    /// Builds the command line: `program arguments... <image> --output-dir <dir>` followed by
    /// the texture arguments in animatable mode.
    pub fn command(&self, image: &Path, output_directory: &Path, mode: PipelineMode) -> Command {
        let mut command = Command::new(&self.settings.program);
        command
            .args(&self.settings.arguments)
            .arg(image)
            .arg("--output-dir")
            .arg(output_directory);
        if mode == PipelineMode::Animatable {
            command.args(&self.settings.texture_arguments);
        }
        if let Some(working_directory) = &self.settings.working_directory {
            command.current_dir(working_directory);
        }
        command
    }

    /// Runs the generator and returns the path of the generated mesh.
    pub fn generate(&self, image: &Path, output_directory: &Path, mode: PipelineMode) -> Result<PathBuf> {
        if !image.exists() {
            return Err(Error::ImageNotFound(image.to_owned()));
        }
        std::fs::create_dir_all(output_directory)?;
        // The generator may run in another working directory
        let image = image.canonicalize()?;
        let output_directory = output_directory.canonicalize()?;

        info!("Generating a mesh from {} ({mode})", image.display());
        let status = self
            .command(&image, &output_directory, mode)
            .status()
            .map_err(|err| Error::FailedToStart {
                program: self.settings.program.clone(),
                error_message: err.to_string(),
            })?;
        if !status.success() {
            error!("Generator failed with {status}");
            return Err(Error::Unsuccessful {
                program: self.settings.program.clone(),
                status: status.to_string(),
            });
        }

        let mesh = output_directory.join(&self.settings.generated_mesh);
        if !mesh.exists() {
            error!("Generated mesh {} is missing", mesh.display());
            return Err(Error::MeshMissing(mesh));
        }
        info!("Generated {}", mesh.display());
        Ok(mesh)
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::OsStr;

    use tempdir::TempDir;

    use super::*;

    fn settings(program: &str, arguments: &[&str]) -> GeneratorSettings {
        GeneratorSettings {
            program: program.to_owned(),
            arguments: arguments.iter().map(|argument| argument.to_string()).collect(),
            working_directory: None,
            ..Default::default()
        }
    }

    #[test]
    fn command_line() {
        let generator = ExternalGenerator::new(GeneratorSettings::default());
        let command = generator.command(Path::new("input.png"), Path::new("out"), PipelineMode::Animatable);
        assert_eq!(command.get_program(), OsStr::new("python"));
        let arguments = command.get_args().collect::<Vec<_>>();
        assert_eq!(arguments[..4], ["run.py", "input.png", "--output-dir", "out"].map(OsStr::new));
        assert!(arguments.contains(&OsStr::new("--bake-texture")));
        assert_eq!(command.get_current_dir(), Some(Path::new("TripoSR")));

        let command = generator.command(Path::new("input.png"), Path::new("out"), PipelineMode::Static);
        assert_eq!(command.get_args().count(), 4);
    }

    #[test]
    fn missing_image() {
        let directory = TempDir::new("polyfold_generator").unwrap();
        let generator = ExternalGenerator::new(settings("true", &[]));
        let result = generator.generate(&directory.path().join("missing.png"), directory.path(), PipelineMode::Static);
        assert!(matches!(result, Err(Error::ImageNotFound(_))));
    }

    #[test]
    fn missing_program() {
        let directory = TempDir::new("polyfold_generator").unwrap();
        let image = directory.path().join("input.png");
        std::fs::write(&image, b"not really a png").unwrap();
        let generator = ExternalGenerator::new(settings("polyfold-generator-that-does-not-exist", &[]));
        let result = generator.generate(&image, &directory.path().join("out"), PipelineMode::Static);
        assert!(matches!(result, Err(Error::FailedToStart { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn mesh_must_exist_after_the_run() {
        let directory = TempDir::new("polyfold_generator").unwrap();
        let image = directory.path().join("input.png");
        std::fs::write(&image, b"not really a png").unwrap();
        // `true` ignores its arguments and succeeds without writing anything
        let generator = ExternalGenerator::new(settings("true", &[]));
        let result = generator.generate(&image, &directory.path().join("out"), PipelineMode::Static);
        assert!(matches!(result, Err(Error::MeshMissing(_))));
    }
}
