//! Hand-assembled descriptors for the test services.
//!
//! `echo/echo.proto` is equivalent to:
//!
//! ```proto
//! syntax = "proto3";
//! package echo;
//!
//! import "google/protobuf/timestamp.proto";
//! import "google/protobuf/wrappers.proto";
//!
//! // Relative importance of a request.
//! enum Priority {
//!   PRIORITY_UNSPECIFIED = 0;
//!   // Handled when idle.
//!   PRIORITY_LOW = 1;
//!   // Handled first.
//!   PRIORITY_HIGH = 2;
//! }
//!
//! // A message to echo back.
//! message EchoRequest {
//!   // Text to echo.
//!   string message = 1;
//!   repeated string tags = 2; // Free-form labels.
//!   map<string, int64> counters = 3;
//!   Priority priority = 4;
//!   google.protobuf.Timestamp sent_at = 5;
//!   google.protobuf.StringValue note = 6;
//!   optional int32 repeat = 7;
//!   // Who the echo is addressed to.
//!   oneof target {
//!     string user = 8;
//!     int64 group_id = 9;
//!   }
//!   bytes payload = 10;
//! }
//!
//! message EchoResponse { /* same fields as EchoRequest */ }
//!
//! message TreeNode { string name = 1; repeated TreeNode children = 2; TreeNode parent = 3; }
//! message Pair { TreeNode left = 1; TreeNode right = 2; }
//! message Folder { string name = 1; repeated Document documents = 2; }
//! message Document { string title = 1; Folder folder = 2; }
//! message Scalars { double f_double = 1; /* ... one field per scalar kind ... */ bytes f_bytes = 15; }
//! message PingRequest {}
//! message PingResponse { string status = 1; }
//!
//! // Echoes messages back.
//! service EchoService {
//!   // Echoes the request.
//!   rpc UnaryEcho(EchoRequest) returns (EchoResponse); // Unary only.
//!   rpc FailEcho(EchoRequest) returns (EchoResponse);
//!   rpc SlowEcho(EchoRequest) returns (EchoResponse);
//!   rpc ServerStreamingEcho(EchoRequest) returns (stream EchoResponse);
//!   rpc ClientStreamingEcho(stream EchoRequest) returns (EchoResponse);
//!   rpc BidirectionalEcho(stream EchoRequest) returns (stream EchoResponse);
//! }
//!
//! service AdminService {
//!   // Checks that the server answers.
//!   rpc Ping(PingRequest) returns (PingResponse);
//!   rpc Inspect(Scalars) returns (Pair);
//! }
//!
//! service AuditService {
//!   rpc Tail(PingRequest) returns (stream PingResponse);
//! }
//! ```
//!
//! `standalone.proto` declares no package and a single `Standalone` service reusing the ping
//! messages. `legacy/legacy.proto` is a proto2 file with a group field.
use prost::Message;
use prost_reflect::{DescriptorError, DescriptorPool};
use prost_types::{
    DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto,
    FileDescriptorProto, FileDescriptorSet, MessageOptions, MethodDescriptorProto,
    OneofDescriptorProto, ServiceDescriptorProto, SourceCodeInfo,
    field_descriptor_proto::{Label, Type},
    source_code_info::Location,
};

pub const ECHO_FILE: &str = "echo/echo.proto";
pub const STANDALONE_FILE: &str = "standalone.proto";
pub const LEGACY_FILE: &str = "legacy/legacy.proto";

const TIMESTAMP_FILE: &str = "google/protobuf/timestamp.proto";
const WRAPPERS_FILE: &str = "google/protobuf/wrappers.proto";

/// Every file needed to serve the echo services, dependencies first.
pub fn file_descriptor_set() -> FileDescriptorSet {
    let mut file = well_known_files();
    file.push(echo_file());
    file.push(standalone_file());

    FileDescriptorSet { file }
}

/// [`file_descriptor_set`] in its binary form, as `protoc --descriptor_set_out` would write it.
pub fn encoded_file_descriptor_set() -> Vec<u8> {
    file_descriptor_set().encode_to_vec()
}

pub fn descriptor_pool() -> Result<DescriptorPool, DescriptorError> {
    DescriptorPool::from_file_descriptor_set(file_descriptor_set())
}

/// A proto2 file whose `Envelope` message carries a group field.
pub fn legacy_file_descriptor_set() -> FileDescriptorSet {
    let meta = DescriptorProto {
        name: Some("Meta".into()),
        field: vec![scalar("origin", 1, Type::String)],
        ..Default::default()
    };

    let envelope = DescriptorProto {
        name: Some("Envelope".into()),
        field: vec![
            FieldDescriptorProto {
                label: Some(Label::Required as i32),
                ..scalar("id", 1, Type::String)
            },
            FieldDescriptorProto {
                type_name: Some(".legacy.Envelope.Meta".into()),
                ..scalar("meta", 2, Type::Group)
            },
            scalar("note", 3, Type::String),
        ],
        nested_type: vec![meta],
        ..Default::default()
    };

    let file = FileDescriptorProto {
        name: Some(LEGACY_FILE.into()),
        package: Some("legacy".into()),
        message_type: vec![envelope],
        service: vec![ServiceDescriptorProto {
            name: Some("LegacyService".into()),
            method: vec![method(
                "Send",
                ".legacy.Envelope",
                ".legacy.Envelope",
                false,
                false,
            )],
            ..Default::default()
        }],
        syntax: Some("proto2".into()),
        ..Default::default()
    };

    FileDescriptorSet { file: vec![file] }
}

fn well_known_files() -> Vec<FileDescriptorProto> {
    let pool = DescriptorPool::global();

    [TIMESTAMP_FILE, WRAPPERS_FILE]
        .into_iter()
        .filter_map(|name| pool.get_file_by_name(name))
        .map(|file| file.file_descriptor_proto().clone())
        .collect()
}

fn echo_file() -> FileDescriptorProto {
    FileDescriptorProto {
        name: Some(ECHO_FILE.into()),
        package: Some("echo".into()),
        dependency: vec![TIMESTAMP_FILE.into(), WRAPPERS_FILE.into()],
        message_type: vec![
            echo_message("EchoRequest"),
            echo_message("EchoResponse"),
            DescriptorProto {
                name: Some("TreeNode".into()),
                field: vec![
                    scalar("name", 1, Type::String),
                    repeated(message("children", 2, ".echo.TreeNode")),
                    message("parent", 3, ".echo.TreeNode"),
                ],
                ..Default::default()
            },
            DescriptorProto {
                name: Some("Pair".into()),
                field: vec![
                    message("left", 1, ".echo.TreeNode"),
                    message("right", 2, ".echo.TreeNode"),
                ],
                ..Default::default()
            },
            DescriptorProto {
                name: Some("Folder".into()),
                field: vec![
                    scalar("name", 1, Type::String),
                    repeated(message("documents", 2, ".echo.Document")),
                ],
                ..Default::default()
            },
            DescriptorProto {
                name: Some("Document".into()),
                field: vec![
                    scalar("title", 1, Type::String),
                    message("folder", 2, ".echo.Folder"),
                ],
                ..Default::default()
            },
            scalars_message(),
            DescriptorProto {
                name: Some("PingRequest".into()),
                ..Default::default()
            },
            DescriptorProto {
                name: Some("PingResponse".into()),
                field: vec![scalar("status", 1, Type::String)],
                ..Default::default()
            },
        ],
        enum_type: vec![EnumDescriptorProto {
            name: Some("Priority".into()),
            value: ["PRIORITY_UNSPECIFIED", "PRIORITY_LOW", "PRIORITY_HIGH"]
                .into_iter()
                .zip(0..)
                .map(|(name, number)| EnumValueDescriptorProto {
                    name: Some(name.into()),
                    number: Some(number),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }],
        service: vec![
            ServiceDescriptorProto {
                name: Some("EchoService".into()),
                method: vec![
                    method("UnaryEcho", ".echo.EchoRequest", ".echo.EchoResponse", false, false),
                    method("FailEcho", ".echo.EchoRequest", ".echo.EchoResponse", false, false),
                    method("SlowEcho", ".echo.EchoRequest", ".echo.EchoResponse", false, false),
                    method(
                        "ServerStreamingEcho",
                        ".echo.EchoRequest",
                        ".echo.EchoResponse",
                        false,
                        true,
                    ),
                    method(
                        "ClientStreamingEcho",
                        ".echo.EchoRequest",
                        ".echo.EchoResponse",
                        true,
                        false,
                    ),
                    method(
                        "BidirectionalEcho",
                        ".echo.EchoRequest",
                        ".echo.EchoResponse",
                        true,
                        true,
                    ),
                ],
                ..Default::default()
            },
            ServiceDescriptorProto {
                name: Some("AdminService".into()),
                method: vec![
                    method("Ping", ".echo.PingRequest", ".echo.PingResponse", false, false),
                    method("Inspect", ".echo.Scalars", ".echo.Pair", false, false),
                ],
                ..Default::default()
            },
            ServiceDescriptorProto {
                name: Some("AuditService".into()),
                method: vec![method(
                    "Tail",
                    ".echo.PingRequest",
                    ".echo.PingResponse",
                    false,
                    true,
                )],
                ..Default::default()
            },
        ],
        source_code_info: Some(echo_source_info()),
        syntax: Some("proto3".into()),
        ..Default::default()
    }
}

fn standalone_file() -> FileDescriptorProto {
    FileDescriptorProto {
        name: Some(STANDALONE_FILE.into()),
        dependency: vec![ECHO_FILE.into()],
        service: vec![ServiceDescriptorProto {
            name: Some("Standalone".into()),
            method: vec![method(
                "Ping",
                ".echo.PingRequest",
                ".echo.PingResponse",
                false,
                false,
            )],
            ..Default::default()
        }],
        syntax: Some("proto3".into()),
        ..Default::default()
    }
}

/// `EchoRequest` and `EchoResponse` share their shape.
fn echo_message(name: &str) -> DescriptorProto {
    let entry = DescriptorProto {
        name: Some("CountersEntry".into()),
        field: vec![scalar("key", 1, Type::String), scalar("value", 2, Type::Int64)],
        options: Some(MessageOptions {
            map_entry: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    };

    DescriptorProto {
        name: Some(name.into()),
        field: vec![
            scalar("message", 1, Type::String),
            repeated(scalar("tags", 2, Type::String)),
            repeated(message(
                "counters",
                3,
                &format!(".echo.{name}.CountersEntry"),
            )),
            FieldDescriptorProto {
                r#type: Some(Type::Enum as i32),
                ..message("priority", 4, ".echo.Priority")
            },
            message("sent_at", 5, ".google.protobuf.Timestamp"),
            message("note", 6, ".google.protobuf.StringValue"),
            FieldDescriptorProto {
                oneof_index: Some(1),
                proto3_optional: Some(true),
                ..scalar("repeat", 7, Type::Int32)
            },
            FieldDescriptorProto {
                oneof_index: Some(0),
                ..scalar("user", 8, Type::String)
            },
            FieldDescriptorProto {
                oneof_index: Some(0),
                ..scalar("group_id", 9, Type::Int64)
            },
            scalar("payload", 10, Type::Bytes),
        ],
        nested_type: vec![entry],
        oneof_decl: vec![
            OneofDescriptorProto {
                name: Some("target".into()),
                ..Default::default()
            },
            OneofDescriptorProto {
                name: Some("_repeat".into()),
                ..Default::default()
            },
        ],
        ..Default::default()
    }
}

fn scalars_message() -> DescriptorProto {
    let kinds = [
        ("f_double", Type::Double),
        ("f_float", Type::Float),
        ("f_int32", Type::Int32),
        ("f_int64", Type::Int64),
        ("f_uint32", Type::Uint32),
        ("f_uint64", Type::Uint64),
        ("f_sint32", Type::Sint32),
        ("f_sint64", Type::Sint64),
        ("f_fixed32", Type::Fixed32),
        ("f_fixed64", Type::Fixed64),
        ("f_sfixed32", Type::Sfixed32),
        ("f_sfixed64", Type::Sfixed64),
        ("f_bool", Type::Bool),
        ("f_string", Type::String),
        ("f_bytes", Type::Bytes),
    ];

    DescriptorProto {
        name: Some("Scalars".into()),
        field: kinds
            .into_iter()
            .zip(1..)
            .map(|((name, kind), number)| scalar(name, number, kind))
            .collect(),
        ..Default::default()
    }
}

fn echo_source_info() -> SourceCodeInfo {
    SourceCodeInfo {
        location: vec![
            comment(&[4, 0], Some(" A message to echo back.\n"), None),
            comment(&[4, 0, 2, 0], Some(" Text to echo.\n"), None),
            comment(&[4, 0, 2, 1], None, Some(" Free-form labels.\n")),
            comment(&[4, 0, 8, 0], Some(" Who the echo is addressed to.\n"), None),
            comment(&[5, 0], Some(" Relative importance of a request.\n"), None),
            comment(&[5, 0, 2, 1], Some(" Handled when idle.\n"), None),
            comment(&[5, 0, 2, 2], Some(" Handled first.\n"), None),
            comment(&[6, 0], Some(" Echoes messages back.\n"), None),
            Location {
                span: vec![42, 2, 60],
                ..comment(
                    &[6, 0, 2, 0],
                    Some(" Echoes the request.\n"),
                    Some(" Unary only.\n"),
                )
            },
            comment(&[6, 1, 2, 0], Some(" Checks that the server answers.\n"), None),
        ],
    }
}

fn comment(path: &[i32], leading: Option<&str>, trailing: Option<&str>) -> Location {
    Location {
        path: path.to_vec(),
        span: vec![0, 0, 0],
        leading_comments: leading.map(Into::into),
        trailing_comments: trailing.map(Into::into),
        leading_detached_comments: Vec::new(),
    }
}

fn scalar(name: &str, number: i32, kind: Type) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.into()),
        number: Some(number),
        label: Some(Label::Optional as i32),
        r#type: Some(kind as i32),
        json_name: Some(json_name(name)),
        ..Default::default()
    }
}

fn message(name: &str, number: i32, type_name: &str) -> FieldDescriptorProto {
    FieldDescriptorProto {
        type_name: Some(type_name.into()),
        ..scalar(name, number, Type::Message)
    }
}

fn repeated(field: FieldDescriptorProto) -> FieldDescriptorProto {
    FieldDescriptorProto {
        label: Some(Label::Repeated as i32),
        ..field
    }
}

fn method(
    name: &str,
    input: &str,
    output: &str,
    client_streaming: bool,
    server_streaming: bool,
) -> MethodDescriptorProto {
    MethodDescriptorProto {
        name: Some(name.into()),
        input_type: Some(input.into()),
        output_type: Some(output.into()),
        client_streaming: Some(client_streaming),
        server_streaming: Some(server_streaming),
        ..Default::default()
    }
}

fn json_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = false;

    for c in name.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }

    out
}
