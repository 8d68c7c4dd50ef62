use cannula::GeneratorError;

/// Failures surfaced by the command line
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Generator(#[from] GeneratorError),

    /// The working directory could not be determined
    #[error("could not read the current directory: {0}")]
    CurrentDirectory(std::io::Error),
}
