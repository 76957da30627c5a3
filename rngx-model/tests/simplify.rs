// Integration tests for the simplification pipeline.
//
// Each test feeds a schema (plus any referenced documents, via an in-memory
// resource map) through the full pipeline and checks the rewritten tree or
// the compiled grammar.

use rngx_model::{Compiler, Grammar, NameClass, PatternKind, RelaxError, Resources};
use rngx_syntax::tree::{Doc, NodeId};
use rngx_syntax::writer::write_xml;
use std::collections::HashMap;
use url::Url;

const NS: &str = "xmlns=\"http://relaxng.org/ns/structure/1.0\"";
const XSD: &str = "http://www.w3.org/2001/XMLSchema-datatypes";

struct MapResources(HashMap<String, String>);

impl MapResources {
    fn empty() -> MapResources {
        MapResources(HashMap::new())
    }

    fn with(files: &[(&str, String)]) -> MapResources {
        MapResources(
            files
                .iter()
                .map(|(url, src)| (url.to_string(), src.clone()))
                .collect(),
        )
    }
}

impl Resources for MapResources {
    fn load(&self, url: &Url) -> Result<String, RelaxError> {
        self.0
            .get(url.as_str())
            .cloned()
            .ok_or_else(|| RelaxError::ResourceLoad {
                url: url.to_string(),
                message: "not found".to_string(),
            })
    }
}

fn base() -> Url {
    Url::parse("file:///main.rng").unwrap()
}

fn simplify_with(resources: MapResources, src: &str) -> (Doc, NodeId) {
    Compiler::new(resources)
        .simplify_source(src, &base())
        .unwrap()
}

fn simplify_one(src: &str) -> (Doc, NodeId) {
    simplify_with(MapResources::empty(), src)
}

fn compile_with(resources: MapResources, src: &str) -> Result<Grammar, RelaxError> {
    Compiler::new(resources).compile_source(src, &base())
}

fn compile_one(src: &str) -> Result<Grammar, RelaxError> {
    compile_with(MapResources::empty(), src)
}

/// The element pattern of the only definition whose body is an element with
/// the given name-class local name.
fn element_body<'g>(grammar: &'g Grammar, name: &str) -> &'g PatternKind {
    for d in &grammar.defines {
        if let PatternKind::Element(NameClass::Named { name: n, .. }, body) = &d.pattern.kind {
            if n == name {
                return &body.kind;
            }
        }
    }
    panic!("no element definition named {:?}", name);
}

#[test]
fn trivial_schema_reaches_normal_form() {
    let (doc, root) = simplify_one(&format!("<element name=\"a\" {}><text/></element>", NS));
    assert_eq!(doc.name(root), "grammar");
    let kids = doc.child_elements(root);
    assert_eq!(kids.len(), 2);
    assert_eq!(doc.name(kids[0]), "start");
    let start_ref = doc.child_elements(kids[0])[0];
    assert_eq!(doc.name(start_ref), "ref");
    assert_eq!(doc.attribute(start_ref, "name"), Some("__a-elt-1"));
    assert_eq!(doc.name(kids[1]), "define");
    assert_eq!(doc.attribute(kids[1], "name"), Some("__a-elt-1"));
    let element = doc.child_elements(kids[1])[0];
    assert_eq!(doc.name(element), "element");
    let nc = doc.child_elements(element)[0];
    assert_eq!(doc.name(nc), "name");
    assert_eq!(doc.text(nc), "a");
    assert_eq!(doc.attribute(nc, "ns"), Some(""));
}

#[test]
fn simplified_output_parses_as_relaxng() {
    let (doc, root) = simplify_one(&format!(
        "<element name=\"a\" {}><optional><attribute name=\"id\"/></optional><text/></element>",
        NS
    ));
    let written = write_xml(&doc, root);
    let parsed = roxmltree::Document::parse(&written).unwrap();
    let rng_root = parsed.root_element();
    assert_eq!(rng_root.tag_name().name(), "grammar");
    assert_eq!(
        rng_root.tag_name().namespace(),
        Some("http://relaxng.org/ns/structure/1.0")
    );
    // every element definition holds exactly one element
    for define in rng_root
        .children()
        .filter(|n| n.has_tag_name(("http://relaxng.org/ns/structure/1.0", "define")))
    {
        assert_eq!(define.children().filter(|c| c.is_element()).count(), 1);
    }
}

#[test]
fn simplify_is_idempotent() {
    let src = format!(
        "<grammar {}>\
           <start><ref name=\"doc\"/></start>\
           <define name=\"doc\">\
             <element name=\"doc\">\
               <optional><attribute name=\"id\"/></optional>\
               <mixed><zeroOrMore><ref name=\"item\"/></zeroOrMore></mixed>\
             </element>\
           </define>\
           <define name=\"item\">\
             <element name=\"item\">\
               <choice>\
                 <value>x</value>\
                 <data type=\"token\"><param name=\"maxLength\">3</param></data>\
                 <text/>\
               </choice>\
             </element>\
           </define>\
         </grammar>",
        NS
    );
    let (doc1, root1) = simplify_one(&src);
    let written = write_xml(&doc1, root1);
    let (doc2, root2) = simplify_one(&written);
    assert!(
        doc1.subtree_equal(root1, &doc2, root2),
        "not idempotent:\nfirst:  {}\nsecond: {}",
        written,
        write_xml(&doc2, root2)
    );
}

#[test]
fn nested_grammar_definitions_are_renamed_stably() {
    // outer grammar and one nested grammar, both defining foo
    let src = format!(
        "<grammar {}>\
           <start><ref name=\"foo\"/></start>\
           <define name=\"foo\">\
             <element name=\"e\">\
               <grammar>\
                 <start><ref name=\"foo\"/></start>\
                 <define name=\"foo\">\
                   <element name=\"inner\"><text/></element>\
                 </define>\
               </grammar>\
             </element>\
           </define>\
         </grammar>",
        NS
    );
    let grammar = compile_one(&src).unwrap();
    let names: Vec<&str> = grammar.defines.iter().map(|d| d.name.as_str()).collect();
    assert!(names.contains(&"foo-gr-1"), "definitions: {:?}", names);
    assert!(names.contains(&"foo-gr-2"), "definitions: {:?}", names);
    match &grammar.start.kind {
        PatternKind::Ref(name) => assert_eq!(name, "foo-gr-1"),
        other => panic!("unexpected start {:?}", other),
    }
    // the element factored from the outer definition refers to the inner foo
    match element_body(&grammar, "e") {
        PatternKind::Ref(name) => assert_eq!(name, "foo-gr-2"),
        other => panic!("unexpected body {:?}", other),
    }
}

#[test]
fn parent_ref_targets_the_outer_grammar() {
    let src = format!(
        "<grammar {}>\
           <start><ref name=\"outer\"/></start>\
           <define name=\"outer\">\
             <element name=\"e\">\
               <grammar>\
                 <start><parentRef name=\"leaf\"/></start>\
               </grammar>\
             </element>\
           </define>\
           <define name=\"leaf\">\
             <element name=\"leaf\"><empty/></element>\
           </define>\
         </grammar>",
        NS
    );
    let grammar = compile_one(&src).unwrap();
    match element_body(&grammar, "e") {
        PatternKind::Ref(name) => assert_eq!(name, "leaf-gr-1"),
        other => panic!("unexpected body {:?}", other),
    }
}

#[test]
fn datatype_library_does_not_cross_external_refs() {
    // the outer schema selects the XSD library; the referenced document says
    // nothing, so its data must land in the built-in library instead
    let inner = format!("<data type=\"string\" {}/>", NS);
    let src = format!(
        "<element name=\"r\" datatypeLibrary=\"{}\" {}>\
           <group>\
             <externalRef href=\"inner.rng\"/>\
             <data type=\"short\"/>\
           </group>\
         </element>",
        XSD, NS
    );
    let resources = MapResources::with(&[("file:///inner.rng", inner)]);
    let grammar = compile_with(resources, &src).unwrap();
    let mut libraries = Vec::new();
    collect_data_libraries(&grammar, &mut libraries);
    libraries.sort();
    assert_eq!(
        libraries,
        vec!["".to_string(), XSD.to_string()],
        "inlined data must use the built-in library, the outer one the XSD library"
    );
}

fn collect_data_libraries(grammar: &Grammar, out: &mut Vec<String>) {
    fn walk(kind: &PatternKind, out: &mut Vec<String>) {
        match kind {
            PatternKind::Data {
                datatype_library, ..
            } => out.push(datatype_library.clone()),
            PatternKind::List(p) | PatternKind::OneOrMore(p) => walk(&p.kind, out),
            PatternKind::Choice(a, b)
            | PatternKind::Group(a, b)
            | PatternKind::Interleave(a, b) => {
                walk(&a.kind, out);
                walk(&b.kind, out);
            }
            PatternKind::Element(_, p) | PatternKind::Attribute(_, p) => walk(&p.kind, out),
            _ => {}
        }
    }
    walk(&grammar.start.kind, out);
    for d in &grammar.defines {
        walk(&d.pattern.kind, out);
    }
}

#[test]
fn external_ref_passes_its_ns_to_the_inlined_root() {
    let inner = format!("<element name=\"i\" {}><text/></element>", NS);
    let src = format!(
        "<grammar {}>\
           <start><externalRef href=\"inner.rng\" ns=\"urn:lib\"/></start>\
         </grammar>",
        NS
    );
    let resources = MapResources::with(&[("file:///inner.rng", inner)]);
    let grammar = compile_with(resources, &src).unwrap();
    let define = &grammar.defines[0];
    match &define.pattern.kind {
        PatternKind::Element(NameClass::Named { namespace_uri, name }, _) => {
            assert_eq!(name, "i");
            assert_eq!(namespace_uri, "urn:lib");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn include_overrides_replace_definitions() {
    let lib = format!(
        "<grammar {}>\
           <define name=\"a\">\
             <element name=\"a1\"><empty/></element>\
           </define>\
         </grammar>",
        NS
    );
    let src = format!(
        "<grammar {}>\
           <start><ref name=\"a\"/></start>\
           <include href=\"lib.rng\">\
             <define name=\"a\">\
               <element name=\"a2\"><empty/></element>\
             </define>\
           </include>\
         </grammar>",
        NS
    );
    let resources = MapResources::with(&[("file:///lib.rng", lib)]);
    let grammar = compile_with(resources, &src).unwrap();
    assert_eq!(grammar.defines.len(), 1);
    match &grammar.defines[0].pattern.kind {
        PatternKind::Element(NameClass::Named { name, .. }, _) => assert_eq!(name, "a2"),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn include_override_must_match_something() {
    let lib = format!(
        "<grammar {}>\
           <define name=\"a\"><element name=\"a1\"><empty/></element></define>\
         </grammar>",
        NS
    );
    let src = format!(
        "<grammar {}>\
           <start><ref name=\"a\"/></start>\
           <include href=\"lib.rng\">\
             <define name=\"nope\"><empty/></define>\
           </include>\
         </grammar>",
        NS
    );
    let resources = MapResources::with(&[("file:///lib.rng", lib)]);
    match compile_with(resources, &src) {
        Err(RelaxError::SchemaStructure { message, .. }) => {
            assert!(message.contains("matches nothing"), "{}", message);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn not_allowed_collapses_required_contexts() {
    let grammar = compile_one(&format!(
        "<element name=\"e\" {}><group><notAllowed/><text/></group></element>",
        NS
    ))
    .unwrap();
    assert!(matches!(element_body(&grammar, "e"), PatternKind::NotAllowed));

    let grammar = compile_one(&format!(
        "<element name=\"e\" {}><choice><notAllowed/><text/></choice></element>",
        NS
    ))
    .unwrap();
    assert!(matches!(element_body(&grammar, "e"), PatternKind::Text));
}

#[test]
fn empty_is_absorbed_and_sorted_first() {
    let grammar = compile_one(&format!(
        "<element name=\"e\" {}><group><empty/><text/></group></element>",
        NS
    ))
    .unwrap();
    assert!(matches!(element_body(&grammar, "e"), PatternKind::Text));

    // zeroOrMore p => choice(oneOrMore p, empty), normalised to empty first
    let grammar = compile_one(&format!(
        "<element name=\"e\" {}><zeroOrMore><text/></zeroOrMore></element>",
        NS
    ))
    .unwrap();
    match element_body(&grammar, "e") {
        PatternKind::Choice(a, b) => {
            assert!(matches!(a.kind, PatternKind::Empty));
            assert!(matches!(b.kind, PatternKind::OneOrMore(_)));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn mixed_becomes_interleave_with_text() {
    let grammar = compile_one(&format!(
        "<element name=\"e\" {}>\
           <mixed><element name=\"i\"><empty/></element></mixed>\
         </element>",
        NS
    ))
    .unwrap();
    match element_body(&grammar, "e") {
        PatternKind::Interleave(a, b) => {
            assert!(matches!(a.kind, PatternKind::Text));
            assert!(matches!(b.kind, PatternKind::Ref(_)));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn cyclic_pattern_definitions_are_rejected() {
    let err = compile_one(&format!(
        "<grammar {}>\
           <start><ref name=\"a\"/></start>\
           <define name=\"a\"><ref name=\"b\"/></define>\
           <define name=\"b\"><ref name=\"a\"/></define>\
         </grammar>",
        NS
    ));
    match err {
        Err(RelaxError::SchemaStructure { message, .. }) => {
            assert!(message.contains("cyclic"), "{}", message);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn recursive_external_refs_are_rejected() {
    let src = format!(
        "<grammar {}><start><externalRef href=\"main.rng\"/></start></grammar>",
        NS
    );
    let resources = MapResources::with(&[("file:///main.rng", src.clone())]);
    match compile_with(resources, &src) {
        Err(RelaxError::SchemaStructure { message, .. }) => {
            assert!(message.contains("recursive"), "{}", message);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn combine_choice_merges_definitions() {
    let grammar = compile_one(&format!(
        "<grammar {}>\
           <start><ref name=\"e\"/></start>\
           <define name=\"e\">\
             <element name=\"e\"><ref name=\"c\"/></element>\
           </define>\
           <define name=\"c\" combine=\"choice\"><value>a</value></define>\
           <define name=\"c\" combine=\"choice\"><value>b</value></define>\
         </grammar>",
        NS
    ))
    .unwrap();
    match element_body(&grammar, "e") {
        PatternKind::Choice(_, _) => {}
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn duplicate_definitions_without_combine_are_rejected() {
    let err = compile_one(&format!(
        "<grammar {}>\
           <start><ref name=\"e\"/></start>\
           <define name=\"e\"><element name=\"e\"><empty/></element></define>\
           <define name=\"c\"><value>a</value></define>\
           <define name=\"c\"><value>b</value></define>\
         </grammar>",
        NS
    ));
    match err {
        Err(RelaxError::SchemaStructure { message, .. }) => {
            assert!(message.contains("combine"), "{}", message);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn grammar_without_start_is_rejected() {
    let err = compile_one(&format!(
        "<grammar {}>\
           <define name=\"a\"><element name=\"a\"><empty/></element></define>\
         </grammar>",
        NS
    ));
    match err {
        Err(RelaxError::SchemaStructure { message, .. }) => {
            assert!(message.contains("start"), "{}", message);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn simplify_can_stop_at_a_given_step() {
    use rngx_model::CompileOptions;
    let mut options = CompileOptions::default();
    options.simplify_to = 10;
    let compiler = Compiler::with_options(MapResources::empty(), options);
    let (doc, root) = compiler
        .simplify_source(
            &format!("<element name=\"a\" {}><optional><text/></optional></element>", NS),
            &base(),
        )
        .unwrap();
    // optional survives (step 11 not run) and no grammar wrapper exists yet
    assert_eq!(doc.name(root), "element");
    let written = write_xml(&doc, root);
    assert!(written.contains("<optional>"), "{}", written);
}
