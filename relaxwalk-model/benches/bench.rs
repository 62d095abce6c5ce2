use criterion::*;
use relaxwalk_model::{Compiler, MapResources};

const SCHEMA: &str = r#"<grammar xmlns="http://relaxng.org/ns/structure/1.0">
  <start><ref name="doc"/></start>
  <define name="doc">
    <element name="doc">
      <optional><attribute name="version"><text/></attribute></optional>
      <zeroOrMore><ref name="section"/></zeroOrMore>
    </element>
  </define>
  <define name="section">
    <element name="section">
      <attribute name="title"><text/></attribute>
      <mixed>
        <zeroOrMore>
          <choice>
            <element name="em"><text/></element>
            <element name="code"><text/></element>
          </choice>
        </zeroOrMore>
      </mixed>
    </element>
  </define>
</grammar>"#;

fn schema_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");
    group.bench_function("compile", |b| {
        b.iter(|| {
            let resources = MapResources::new(&[("schema.rng", SCHEMA)]);
            let mut compiler = Compiler::new(resources);
            compiler.compile("schema.rng").expect("compiler.compile()");
        });
    });
    group.finish();
}

criterion_group!(benches, schema_compile);
criterion_main!(benches);
