//! # Source Comments
//!
//! Protobuf keeps comments out of band: every definition is addressed by a path of field
//! numbers and indices inside its `FileDescriptorProto` (e.g. `[4, 0, 2, 1]` is the second
//! field of the first message), and `SourceCodeInfo` maps such paths to comments and spans.
use crate::types::SourceSpan;
use prost_reflect::{
    EnumDescriptor, EnumValueDescriptor, FieldDescriptor, FileDescriptor, MessageDescriptor,
    MethodDescriptor, OneofDescriptor, ServiceDescriptor,
};
use prost_types::{SourceCodeInfo, source_code_info::Location};

/// `FileDescriptorProto.service`.
pub(crate) const FILE_SERVICE_TAG: i32 = 6;
/// `ServiceDescriptorProto.method`.
pub(crate) const SERVICE_METHOD_TAG: i32 = 2;

/// Finds the location recorded for exactly `path`.
pub fn find_location<'a>(info: Option<&'a SourceCodeInfo>, path: &[i32]) -> Option<&'a Location> {
    info?.location.iter().find(|loc| loc.path == path)
}

/// Leading then trailing comments, joined by a newline and trimmed.
pub fn join_comments(location: &Location) -> String {
    [
        location.leading_comments.as_deref(),
        location.trailing_comments.as_deref(),
    ]
    .into_iter()
    .flatten()
    .map(str::trim)
    .filter(|c| !c.is_empty())
    .collect::<Vec<_>>()
    .join("\n")
}

/// Converts the 0-based `span` of a location into a 1-based [`SourceSpan`].
pub fn source_span(file: &str, location: &Location) -> Option<SourceSpan> {
    match location.span.as_slice() {
        [line, column, ..] => Some(SourceSpan {
            file: file.to_string(),
            line: u32::try_from(*line).ok()? + 1,
            column: u32::try_from(*column).ok()? + 1,
        }),
        _ => None,
    }
}

/// Access to the comments of a resolved descriptor.
pub trait Documented {
    fn parent_file_descriptor(&self) -> FileDescriptor;

    fn source_path(&self) -> &[i32];

    /// The joined comments, empty when the file carries no source info for this definition.
    fn comments(&self) -> String {
        let file = self.parent_file_descriptor();
        let info = file.file_descriptor_proto().source_code_info.as_ref();

        find_location(info, self.source_path())
            .map(join_comments)
            .unwrap_or_default()
    }

    fn source_span(&self) -> Option<SourceSpan> {
        let file = self.parent_file_descriptor();
        let proto = file.file_descriptor_proto();

        find_location(proto.source_code_info.as_ref(), self.source_path())
            .and_then(|loc| source_span(proto.name(), loc))
    }
}

macro_rules! impl_documented {
    ($($descriptor:ty),* $(,)?) => {
        $(
            impl Documented for $descriptor {
                fn parent_file_descriptor(&self) -> FileDescriptor {
                    self.parent_file()
                }

                fn source_path(&self) -> &[i32] {
                    self.path()
                }
            }
        )*
    };
}

impl_documented!(
    MessageDescriptor,
    FieldDescriptor,
    OneofDescriptor,
    EnumDescriptor,
    EnumValueDescriptor,
    ServiceDescriptor,
    MethodDescriptor,
);
