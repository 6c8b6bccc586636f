fn main() {
    let method = |name: &str, route: &str| {
        tonic_build::manual::Method::builder()
            .name(name)
            .route_name(route)
            .input_type("crate::proto::GreetRequest")
            .output_type("crate::proto::GreetResponse")
            .codec_path("tonic::codec::ProstCodec")
    };

    let service = tonic_build::manual::Service::builder()
        .name("GreetService")
        .package("example.greeting")
        .method(method("greet", "Greet").build())
        .method(method("greet_many_times", "GreetManyTimes").server_streaming().build())
        .method(method("long_greet", "LongGreet").client_streaming().build())
        .method(
            method("greet_everyone", "GreetEveryone")
                .client_streaming()
                .server_streaming()
                .build(),
        )
        .build();

    tonic_build::manual::Builder::new()
        .build_server(true)
        .build_client(true)
        .compile(&[service]);

    println!("cargo:rerun-if-changed=build.rs");
}
