fn main() {
    radixdist::main();
}
