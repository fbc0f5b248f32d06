pub mod payment {
    tonic::include_proto!("payment");
}
