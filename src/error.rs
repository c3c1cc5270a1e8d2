use core::fmt;
use std::io;
use thiserror::Error;

/// Where in a MIDI file an error happened.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum Location {
    /// The `MThd` header chunk.
    Header,
    /// The `MTrk` chunk of the track with the given index.
    Track(usize),
}
impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Location::Header => write!(f, "header chunk"),
            Location::Track(idx) => write!(f, "track {}", idx),
        }
    }
}

/// Represents an error while decoding, validating or encoding a MIDI sequence.
///
/// Errors are broadly categorized into 3 classes (see [`ErrorKind`]):
///
/// - Parse errors, raised when the input bytes are not a valid Standard Midi File.
///   These always carry the byte offset at which the problem was detected.
/// - Validation errors, raised when a value is out of range or a structural invariant of the
///   sequence would be broken.
/// - I/O errors, bubbled unchanged from the underlying reader or writer.
///
/// Errors may be wrapped in an [`Error::At`] layer indicating which chunk or track failed.
#[derive(Debug, Error)]
pub enum Error {
    /// The input is not a valid MIDI file.
    #[error("invalid midi at byte {offset}: {msg}")]
    Parse {
        /// Absolute byte offset where the problem was detected.
        offset: usize,
        /// Non-normative description of the problem.
        msg: &'static str,
    },
    /// A value or a structural invariant was violated.
    #[error("invalid value: {0}")]
    Validation(&'static str),
    /// The underlying reader or writer failed.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// Another error, located within a specific chunk.
    #[error("in {location}: {source}")]
    At {
        location: Location,
        #[source]
        source: Box<Error>,
    },
}

/// The class of an [`Error`], ignoring any location context.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum ErrorKind {
    Parse,
    Validation,
    Io,
}

impl Error {
    #[inline]
    pub(crate) fn parse(offset: usize, msg: &'static str) -> Error {
        Error::Parse { offset, msg }
    }

    #[inline]
    pub(crate) fn invalid(msg: &'static str) -> Error {
        Error::Validation(msg)
    }

    /// The class of this error, looking through any location context.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Parse { .. } => ErrorKind::Parse,
            Error::Validation(_) => ErrorKind::Validation,
            Error::Io(_) => ErrorKind::Io,
            Error::At { source, .. } => source.kind(),
        }
    }

    /// The byte offset of a parse error, if this is one.
    pub fn offset(&self) -> Option<usize> {
        match self {
            Error::Parse { offset, .. } => Some(*offset),
            Error::At { source, .. } => source.offset(),
            _ => None,
        }
    }

    /// The innermost chunk location attached to this error, if any.
    pub fn location(&self) -> Option<Location> {
        match self {
            Error::At { location, source } => source.location().or(Some(*location)),
            _ => None,
        }
    }

    /// Shift the offset of a parse error by `base` bytes.
    ///
    /// Used to turn offsets relative to a chunk payload into absolute file offsets.
    pub(crate) fn rebase(self, base: usize) -> Error {
        match self {
            Error::Parse { offset, msg } => Error::Parse {
                offset: offset + base,
                msg,
            },
            Error::At { location, source } => Error::At {
                location,
                source: Box::new(source.rebase(base)),
            },
            other => other,
        }
    }

    fn at(self, location: Location) -> Error {
        Error::At {
            location,
            source: Box::new(self),
        }
    }
}

pub(crate) trait ResultExt<T> {
    fn context(self, location: Location) -> Result<T>;
}
impl<T, E: Into<Error>> ResultExt<T> for core::result::Result<T, E> {
    #[inline]
    fn context(self, location: Location) -> Result<T> {
        self.map_err(|err| err.into().at(location))
    }
}

/// The result type used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;
