use tonic_build::configure;

fn main() {
    configure()
        .build_client(true)
        // server stubs back the in-process test server
        .build_server(true)
        .compile(&["protos/payment.proto"], &["protos"])
        .unwrap();
}
