fn main() -> anyhow::Result<()> {
    matshift::app::run()
}
