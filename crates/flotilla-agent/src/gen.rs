#![allow(clippy::all)]

pub mod messages {
    tonic::include_proto!("flotilla.messages");
}

pub mod master {
    tonic::include_proto!("flotilla.master");
}

pub mod agent {
    tonic::include_proto!("flotilla.agent");
}

pub mod executor {
    tonic::include_proto!("flotilla.executor");
}

pub mod framework {
    tonic::include_proto!("flotilla.framework");
}

pub const FILE_DESCRIPTOR_SET: &[u8] =
    tonic::include_file_descriptor_set!("flotilla_descriptor");
